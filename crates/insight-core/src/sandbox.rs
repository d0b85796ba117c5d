//! Chart-rendering sandbox contracts.

use crate::config::SandboxConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const PNG_MIME_TYPE: &str = "image/png";

/// A rendered chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageArtifact {
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl ImageArtifact {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            mime_type: PNG_MIME_TYPE.to_string(),
            data: data.into(),
        }
    }
}

/// Variables injected into the chart code, e.g. `{"step_1": [...]}`.
pub type DataBindings = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    Timeout,
    ResourceLimit,
    ExecutionFailed,
    NoOutput,
    /// The runtime could not be started at all.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct SandboxError {
    pub kind: SandboxErrorKind,
    pub message: String,
}

impl SandboxError {
    pub fn new(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Limits handed to the runtime with every fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_memory_mb: u64,
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_memory_mb: config.max_memory_mb,
        }
    }
}

/// An isolated environment that runs chart code.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        data: &DataBindings,
        limits: SandboxLimits,
    ) -> Result<Vec<ImageArtifact>, SandboxError>;
}

/// Forwards fragments to the runtime and enforces the wall-clock limit.
#[derive(Clone)]
pub struct SandboxDispatcher {
    runtime: Arc<dyn SandboxRuntime>,
    limits: SandboxLimits,
}

impl SandboxDispatcher {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, limits: SandboxLimits) -> Self {
        Self { runtime, limits }
    }

    pub async fn render(
        &self,
        code: &str,
        data: &DataBindings,
    ) -> Result<Vec<ImageArtifact>, SandboxError> {
        let images = tokio::time::timeout(
            self.limits.timeout,
            self.runtime.execute(code, data, self.limits),
        )
        .await
        .map_err(|_| {
            SandboxError::new(
                SandboxErrorKind::Timeout,
                format!(
                    "Chart generation timed out after {}s",
                    self.limits.timeout.as_secs_f32()
                ),
            )
        })??;

        if images.is_empty() {
            return Err(SandboxError::new(
                SandboxErrorKind::NoOutput,
                "Chart code ran but produced no figure",
            ));
        }
        Ok(images)
    }
}
