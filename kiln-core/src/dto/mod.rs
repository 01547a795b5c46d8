//! Data Transfer Objects
//!
//! Payloads accepted from the HTTP layer. The orchestrator needs nothing more
//! from its transport than these and plain identifiers.

pub mod repository;
