//! Application layer for Insight.
//!
//! This crate drives a question through the workflow state machine and
//! exposes the session-level use cases built on top of it.

pub mod session_usecase;
pub mod workflow;

pub use session_usecase::{SessionUseCase, SubmitResponse};
pub use workflow::{Orchestrator, TurnOutcome};
