//! Conversation history persistence
//!
//! Turns cluster newest-first under the lead's phone; reads take the
//! last N and hand them back oldest-first, the order prompts expect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use sales_agent_core::{ChatTurn, TurnRole};

use crate::{PersistenceError, ScyllaClient};

/// History store trait
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, phone: &str, turn: &ChatTurn) -> Result<(), PersistenceError>;
    /// Last `limit` turns, oldest first.
    async fn recent(&self, phone: &str, limit: usize) -> Result<Vec<ChatTurn>, PersistenceError>;
    async fn clear(&self, phone: &str) -> Result<(), PersistenceError>;
}

/// ScyllaDB implementation of the history store
#[derive(Clone)]
pub struct ScyllaHistoryStore {
    client: ScyllaClient,
}

impl ScyllaHistoryStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HistoryStore for ScyllaHistoryStore {
    async fn append(&self, phone: &str, turn: &ChatTurn) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.conversation_history (phone, created_at, id, role, text)
             VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    phone,
                    turn.timestamp.timestamp_millis(),
                    Uuid::new_v4(),
                    turn.role.as_str(),
                    &turn.text,
                ),
            )
            .await?;

        Ok(())
    }

    async fn recent(&self, phone: &str, limit: usize) -> Result<Vec<ChatTurn>, PersistenceError> {
        let query = format!(
            "SELECT created_at, role, text FROM {}.conversation_history
             WHERE phone = ? LIMIT ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (phone, limit as i32))
            .await?;

        let mut turns = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (created_at, role, text): (i64, String, String) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                turns.push(ChatTurn {
                    role: TurnRole::from_str(&role).unwrap_or(TurnRole::User),
                    text,
                    timestamp: DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                });
            }
        }

        // Clustering order is newest first
        turns.reverse();
        Ok(turns)
    }

    async fn clear(&self, phone: &str) -> Result<(), PersistenceError> {
        let query = format!(
            "DELETE FROM {}.conversation_history WHERE phone = ?",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(query, (phone,)).await?;
        Ok(())
    }
}

/// In-memory history store
#[derive(Default)]
pub struct InMemoryHistoryStore {
    turns: DashMap<String, Vec<ChatTurn>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, phone: &str, turn: &ChatTurn) -> Result<(), PersistenceError> {
        self.turns
            .entry(phone.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn recent(&self, phone: &str, limit: usize) -> Result<Vec<ChatTurn>, PersistenceError> {
        Ok(self
            .turns
            .get(phone)
            .map(|turns| {
                let start = turns.len().saturating_sub(limit);
                turns[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, phone: &str) -> Result<(), PersistenceError> {
        self.turns.remove(phone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_returns_last_turns_oldest_first() {
        let store = InMemoryHistoryStore::new();
        for i in 0..40 {
            store
                .append("521492000", &ChatTurn::user(format!("m{i}")))
                .await
                .unwrap();
        }

        let turns = store.recent("521492000", 30).await.unwrap();
        assert_eq!(turns.len(), 30);
        assert_eq!(turns.first().unwrap().text, "m10");
        assert_eq!(turns.last().unwrap().text, "m39");
    }

    #[tokio::test]
    async fn clear_wipes_a_conversation() {
        let store = InMemoryHistoryStore::new();
        store
            .append("521492000", &ChatTurn::assistant("hola"))
            .await
            .unwrap();
        store.clear("521492000").await.unwrap();
        assert!(store.recent("521492000", 30).await.unwrap().is_empty());
    }
}
