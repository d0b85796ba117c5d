//! Question answering workflow: planning, query steps, charts and the answer.

mod orchestrator;
pub mod prompts;
pub mod viz;

pub use orchestrator::{Orchestrator, TurnOutcome};
pub use prompts::PromptLibrary;
