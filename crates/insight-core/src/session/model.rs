//! Session domain model.

use super::message::{Turn, TurnRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a title derived from the first question.
pub const AUTO_TITLE_MAX_CHARS: usize = 60;

/// A conversation: an ordered list of turns plus metadata.
///
/// The store owns sessions. The workflow only appends completed turns and never
/// holds a session across a turn, so the title may change while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier (UUID v4)
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether the title was derived from the first question.
    #[serde(default)]
    pub auto_titled: bool,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Session {
    /// Creates an empty session with a fresh id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            auto_titled: false,
            turns: Vec::new(),
        }
    }

    /// Appends turns and drops the oldest ones beyond `max_turns`.
    pub fn push_turns(&mut self, turns: impl IntoIterator<Item = Turn>, max_turns: usize) {
        self.turns.extend(turns);
        self.trim_turns(max_turns);
        self.touch();
    }

    /// Drops the oldest turns beyond `max_turns`. Zero means unbounded.
    pub fn trim_turns(&mut self, max_turns: usize) {
        if max_turns > 0 && self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    pub fn user_turn_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count()
    }
}

/// Derives a session title from the first question of a conversation.
pub fn title_from_query(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= AUTO_TITLE_MAX_CHARS {
        return collapsed;
    }
    let mut title: String = collapsed.chars().take(AUTO_TITLE_MAX_CHARS - 3).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}
