//! Core domain types
//!
//! These types represent the entities tracked by the orchestrator. Repositories,
//! builds and logs are persisted; pipelines and steps are parsed fresh from the
//! source tree of every build and only their effects are stored.

pub mod build;
pub mod log;
pub mod pipeline;
pub mod repository;
