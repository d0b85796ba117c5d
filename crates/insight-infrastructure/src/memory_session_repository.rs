//! In-memory SessionRepository, for tests and ephemeral runs.

use async_trait::async_trait;
use insight_core::error::{InsightError, Result};
use insight_core::session::{Session, SessionRepository, Turn};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, Session>>,
    max_turns: usize,
}

impl InMemorySessionRepository {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new(insight_core::config::SessionsConfig::default().max_turns)
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut session = session.clone();
        session.trim_turns(self.max_turns);
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InsightError::not_found("Session", session_id))?;
        session.push_turns(turns, self.max_turns);
        Ok(session.clone())
    }

    async fn rename(&self, session_id: &str, title: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| InsightError::not_found("Session", session_id))?;
        session.title = title.to_string();
        session.auto_titled = false;
        session.touch();
        Ok(session.clone())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.lock().await.remove(session_id).is_some())
    }
}
