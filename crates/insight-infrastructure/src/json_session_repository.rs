//! Directory-backed SessionRepository: one pretty-printed JSON file per session.
//!
//! ```text
//! sessions/
//! ├── 5f0c...e1.json
//! └── 9a7d...42.json
//! ```
//!
//! Every read-modify-write runs under one async mutex, so a rename racing an
//! append loses neither update.

use crate::paths::InsightPaths;
use crate::storage::AtomicJsonFile;
use anyhow::Context;
use async_trait::async_trait;
use insight_core::error::{InsightError, Result};
use insight_core::session::{Session, SessionRepository, Turn};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

pub struct JsonSessionRepository {
    dir: PathBuf,
    max_turns: usize,
    write_lock: Mutex<()>,
}

impl JsonSessionRepository {
    /// Opens the repository at the default location (`~/.config/insight/sessions`).
    pub async fn default_location(max_turns: usize) -> anyhow::Result<Self> {
        let dir = InsightPaths::sessions_dir()
            .map_err(|e| anyhow::anyhow!("Failed to get sessions directory: {}", e))?;
        Self::new(dir, max_turns).await
    }

    pub async fn new(dir: impl AsRef<Path>, max_turns: usize) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create sessions directory {}", dir.display()))?;
        Ok(Self {
            dir,
            max_turns,
            write_lock: Mutex::new(()),
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, session_id: &str) -> Result<AtomicJsonFile<Session>> {
        // Ids are UUIDs; anything else could escape the directory.
        if uuid::Uuid::parse_str(session_id).is_err() {
            return Err(InsightError::not_found("Session", session_id));
        }
        Ok(AtomicJsonFile::new(self.dir.join(format!("{session_id}.json"))))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let file = self.file(session_id)?;
        Ok(file.load().await?)
    }

    async fn update<F>(&self, session_id: &str, apply: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let file = self.file(session_id)?;
        let mut session = file
            .load()
            .await?
            .ok_or_else(|| InsightError::not_found("Session", session_id))?;
        apply(&mut session);
        file.save(&session).await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionRepository for JsonSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let file = self.file(&session.id)?;
        let mut session = session.clone();
        session.trim_turns(self.max_turns);
        file.save(&session).await?;
        tracing::debug!(session_id = %session.id, "Session created");
        Ok(())
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        if uuid::Uuid::parse_str(session_id).is_err() {
            return Ok(None);
        }
        self.load(session_id).await
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match AtomicJsonFile::<Session>::new(path.clone()).load().await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<Session> {
        let max_turns = self.max_turns;
        self.update(session_id, |session| session.push_turns(turns, max_turns))
            .await
    }

    async fn rename(&self, session_id: &str, title: &str) -> Result<Session> {
        self.update(session_id, |session| {
            session.title = title.to_string();
            session.auto_titled = false;
            session.touch();
        })
        .await
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Ok(file) = self.file(session_id) else {
            return Ok(false);
        };
        Ok(file.remove().await?)
    }
}
