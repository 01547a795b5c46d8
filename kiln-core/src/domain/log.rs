//! Log domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Concatenated output of every executed step of one build, in step order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub id: Uuid,
    pub data: String,
}

impl Log {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: data.into(),
        }
    }
}
