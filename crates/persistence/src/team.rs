//! Team member persistence
//!
//! The roster is small and always read whole; phone matching happens in
//! code because numbers compare by their last ten digits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use sales_agent_core::{PendingAction, StaffMember};

use crate::{PersistenceError, ScyllaClient};

/// Staff store trait
#[async_trait]
pub trait StaffStore: Send + Sync {
    async fn upsert(&self, member: &StaffMember) -> Result<(), PersistenceError>;
    async fn get(&self, id: Uuid) -> Result<Option<StaffMember>, PersistenceError>;
    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError>;
    async fn list_all(&self) -> Result<Vec<StaffMember>, PersistenceError>;
}

const TEAM_COLUMNS: &str =
    "id, name, phone, role, active, banks_json, vacations_json, pending_action_json, created_at";

type TeamRow = (
    Uuid,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

fn row_to_member(row: scylla::frame::response::result::Row) -> Result<StaffMember, PersistenceError> {
    let (id, name, phone, role, active, banks_json, vacations_json, pending_json, created_at): TeamRow =
        row.into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    let banks: Vec<String> = match banks_json {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    let vacation_days: Vec<NaiveDate> = match vacations_json {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    let pending_action: PendingAction = match pending_json {
        Some(json) => serde_json::from_str(&json)?,
        None => PendingAction::None,
    };

    Ok(StaffMember {
        id,
        name,
        phone,
        role_raw: role,
        active,
        banks,
        vacation_days,
        pending_action,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
    })
}

/// ScyllaDB implementation of the staff store
#[derive(Clone)]
pub struct ScyllaStaffStore {
    client: ScyllaClient,
}

impl ScyllaStaffStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StaffStore for ScyllaStaffStore {
    async fn upsert(&self, member: &StaffMember) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.team_members ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            TEAM_COLUMNS
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    member.id,
                    &member.name,
                    &member.phone,
                    &member.role_raw,
                    member.active,
                    serde_json::to_string(&member.banks)?,
                    serde_json::to_string(&member.vacation_days)?,
                    serde_json::to_string(&member.pending_action)?,
                    member.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::debug!(id = %member.id, name = %member.name, "Team member upserted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StaffMember>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.team_members WHERE id = ?",
            TEAM_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (id,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row_to_member(row)?));
            }
        }
        Ok(None)
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError> {
        let query = format!(
            "DELETE FROM {}.team_members WHERE id = ?",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(query, (id,)).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StaffMember>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.team_members",
            TEAM_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, &[]).await?;

        let mut members = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                members.push(row_to_member(row)?);
            }
        }
        Ok(members)
    }
}

/// In-memory staff store
#[derive(Default)]
pub struct InMemoryStaffStore {
    members: DashMap<Uuid, StaffMember>,
}

impl InMemoryStaffStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StaffStore for InMemoryStaffStore {
    async fn upsert(&self, member: &StaffMember) -> Result<(), PersistenceError> {
        self.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StaffMember>, PersistenceError> {
        Ok(self.members.get(&id).map(|m| m.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<(), PersistenceError> {
        self.members.remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StaffMember>, PersistenceError> {
        Ok(self.members.iter().map(|e| e.value().clone()).collect())
    }
}
