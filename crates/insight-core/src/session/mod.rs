//! Session domain module.
//!
//! - `model`: the `Session` entity and title derivation
//! - `message`: conversation turns (`Turn`, `TurnRole`)
//! - `repository`: repository trait for session persistence

mod message;
mod model;
mod repository;

pub use message::{Turn, TurnRole};
pub use model::{AUTO_TITLE_MAX_CHARS, Session, title_from_query};
pub use repository::SessionRepository;
