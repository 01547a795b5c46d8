//! Kiln Core
//!
//! Core types shared across the Kiln CI orchestrator.
//!
//! This crate contains:
//! - Domain types: Repository, Build, Log, Pipeline and Step
//! - DTOs: Request payloads accepted from the transport layer
//! - Duration wire format used for polling intervals

pub mod domain;
pub mod dto;
pub mod duration;
