//! Errors surfaced in a turn's response.

use crate::llm::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure reported alongside a best-effort answer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowError {
    /// The planner's output could not be turned into a plan.
    #[error("could not analyze the question: {message}")]
    Analysis { message: String },

    /// Every planned step failed; `step` is the first of them (1-based).
    #[error("step {step} ({description}) failed after {attempts} attempt(s): {last_error}")]
    RepairExhausted {
        step: usize,
        description: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{error}")]
    Gateway { error: GatewayError },
}

impl From<GatewayError> for WorkflowError {
    fn from(error: GatewayError) -> Self {
        Self::Gateway { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_nests_under_error_key() {
        let err = WorkflowError::from(GatewayError::Timeout { attempts: 6 });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "gateway");
        assert_eq!(json["error"]["kind"], "timeout");
        let back: WorkflowError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
