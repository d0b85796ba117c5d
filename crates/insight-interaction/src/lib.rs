//! Language-model access for Insight.
//!
//! - `gemini` / `groq`: REST providers implementing [`LlmProvider`](insight_core::llm::LlmProvider)
//! - `gateway`: retry, backoff and fallback across providers
//! - `response`: tolerant parsing of model output

pub mod gateway;
pub mod gemini;
pub mod groq;
mod http;
pub mod response;

pub use gateway::{BackoffPolicy, LlmGateway};
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use response::{extract_json_object, parse_llm_json, strip_code_fences};
