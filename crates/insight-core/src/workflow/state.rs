//! Orchestrator states and their transition table.

use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum WorkflowState {
    Analyze,
    PrepareStep,
    ExecuteQuery,
    RepairQuery,
    AdvanceStep,
    GenerateViz,
    Answer,
    End,
}

impl WorkflowState {
    pub const INITIAL: WorkflowState = WorkflowState::Analyze;

    pub fn is_terminal(self) -> bool {
        self == WorkflowState::End
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Analyze, PrepareStep | Answer | End)
                | (PrepareStep, ExecuteQuery | AdvanceStep | GenerateViz)
                | (ExecuteQuery, AdvanceStep | GenerateViz | RepairQuery)
                | (RepairQuery, ExecuteQuery | AdvanceStep | GenerateViz)
                | (AdvanceStep, PrepareStep)
                | (GenerateViz, Answer)
                | (Answer, End)
        )
    }
}
