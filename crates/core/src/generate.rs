use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::DeploymentIntent;

/// A rendered bot source tree: relative path -> file contents. Ordered so
/// materialization and hashing are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSource {
    pub files: BTreeMap<String, String>,
}

impl GeneratedSource {
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("template rendering failed: {0}")]
    Render(String),
    #[error("generated source is incomplete: {0}")]
    Incomplete(String),
}

/// Turns a validated intent into a buildable source tree. Implementations
/// may be slow and may fail; the orchestrator treats the call as opaque.
#[async_trait]
pub trait SourceGenerator: Send + Sync {
    async fn generate(&self, intent: &DeploymentIntent) -> Result<GeneratedSource, GenerateError>;
}
