//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::message::Turn;
use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for managing session persistence.
///
/// Implementations serialize read-modify-write operations per store, so an
/// `append_turns` racing a `rename` never loses either update.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persists a new session, keeping at most the repository's turn limit.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Finds a session by its ID.
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: Session not found
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Lists all sessions, most recently updated first.
    async fn list_all(&self) -> Result<Vec<Session>>;

    /// Appends completed turns in one write and returns the updated session.
    ///
    /// Fails with `NotFound` if the session does not exist.
    async fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<Session>;

    /// Replaces the session title. Fails with `NotFound` if missing.
    async fn rename(&self, session_id: &str, title: &str) -> Result<Session>;

    /// Deletes a session. Returns `false` if it did not exist.
    async fn delete(&self, session_id: &str) -> Result<bool>;
}
