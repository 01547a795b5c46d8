//! Pipeline definitions
//!
//! Locates the pipeline file in a checked-out tree and parses it.

use kiln_core::domain::pipeline::Pipeline;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline file '{0}' not found")]
    NotFound(String),

    #[error("failed to read pipeline file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse pipeline: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    Invalid(String),
}

pub trait PipelineParser: Send + Sync {
    fn parse_pipeline(&self, bytes: &[u8]) -> Result<Pipeline, PipelineError>;
}

/// Parses pipeline files written in YAML
///
/// ```yaml
/// name: example
/// steps:
///   - name: env
///     image: busybox:1.35
///     env:
///       - TEST=true
///     command:
///       - printenv
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlParser;

impl PipelineParser for YamlParser {
    fn parse_pipeline(&self, bytes: &[u8]) -> Result<Pipeline, PipelineError> {
        let pipeline: Pipeline = serde_yaml::from_slice(bytes)?;

        if let Some(step) = pipeline.steps.iter().find(|s| s.image.trim().is_empty()) {
            return Err(PipelineError::Invalid(format!(
                "step '{}' has no image",
                step.name
            )));
        }

        Ok(pipeline)
    }
}

/// Reads `filename` from the root of a checked-out source tree
pub async fn read_pipeline_file(source: &Path, filename: &str) -> Result<Vec<u8>, PipelineError> {
    match tokio::fs::read(source.join(filename)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PipelineError::NotFound(filename.to_string()))
        }
        Err(e) => Err(PipelineError::Read(e)),
    }
}
