//! Conversation history turns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Turns of history kept per lead. Older rows stay in storage but the
/// working window is always the most recent slice.
pub const HISTORY_LIMIT: usize = 30;

/// Turns handed to the classifier as conversational context.
pub const CLASSIFIER_WINDOW: usize = 8;

/// Role in a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Customer or staff message
    User,
    /// Agent reply
    Assistant,
    /// System message (instructions)
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(TurnRole::User),
            "assistant" => Some(TurnRole::Assistant),
            "system" => Some(TurnRole::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single stored turn in a lead conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Most recent `n` turns, oldest first.
pub fn recent_window(turns: &[ChatTurn], n: usize) -> &[ChatTurn] {
    let start = turns.len().saturating_sub(n);
    &turns[start..]
}

/// Drop everything older than the working window, in place.
pub fn cap_history(turns: &mut Vec<ChatTurn>) {
    if turns.len() > HISTORY_LIMIT {
        let drop = turns.len() - HISTORY_LIMIT;
        turns.drain(..drop);
    }
}
