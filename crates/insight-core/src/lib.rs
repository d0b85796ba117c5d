//! Domain layer of Insight: sessions, turns, traces, the execution plan and
//! the traits through which the workflow reaches its collaborators.

pub mod config;
pub mod error;
pub mod llm;
pub mod query;
pub mod sandbox;
pub mod schema;
pub mod session;
pub mod trace;
pub mod workflow;

pub use error::{InsightError, Result};
