//! Pipeline domain types

use serde::{Deserialize, Serialize};

/// Ordered list of steps declared in a repository's pipeline file
///
/// Parsed from the source tree on every build and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One containerized unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` pairs passed to the container
    #[serde(default, rename = "env")]
    pub environment: Vec<String>,
    /// Entrypoint override; empty keeps the image's entrypoint
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}
