//! Credit application persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use sales_agent_core::{CreditApplication, CreditStatus};

use crate::{PersistenceError, ScyllaClient};

/// Credit application store trait
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn upsert(&self, app: &CreditApplication) -> Result<(), PersistenceError>;
    async fn get(
        &self,
        lead_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CreditApplication>, PersistenceError>;
    async fn list_for_lead(&self, lead_id: Uuid) -> Result<Vec<CreditApplication>, PersistenceError>;
    /// Whole table, bounded. Advisor load balancing and name lookups
    /// filter in code.
    async fn list_all(&self, limit: i32) -> Result<Vec<CreditApplication>, PersistenceError>;
}

const CREDIT_COLUMNS: &str = "lead_id, id, advisor_id, bank, monthly_income, down_payment, \
     requested_amount, status, created_at, updated_at";

type CreditRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    i64,
    i64,
    i64,
    String,
    i64,
    i64,
);

fn row_to_application(
    row: scylla::frame::response::result::Row,
) -> Result<CreditApplication, PersistenceError> {
    let (
        lead_id,
        id,
        advisor_id,
        bank,
        monthly_income,
        down_payment,
        requested_amount,
        status,
        created_at,
        updated_at,
    ): CreditRow = row
        .into_typed()
        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    Ok(CreditApplication {
        id,
        lead_id,
        advisor_id,
        bank,
        monthly_income,
        down_payment,
        requested_amount,
        status: CreditStatus::from_str(&status).unwrap_or(CreditStatus::Pending),
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_else(Utc::now),
    })
}

/// ScyllaDB implementation of the credit store
#[derive(Clone)]
pub struct ScyllaCreditStore {
    client: ScyllaClient,
}

impl ScyllaCreditStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CreditStore for ScyllaCreditStore {
    async fn upsert(&self, app: &CreditApplication) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.credit_applications ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            CREDIT_COLUMNS
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    app.lead_id,
                    app.id,
                    app.advisor_id,
                    &app.bank,
                    app.monthly_income,
                    app.down_payment,
                    app.requested_amount,
                    app.status.as_str(),
                    app.created_at.timestamp_millis(),
                    app.updated_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(
            application_id = %app.id,
            lead_id = %app.lead_id,
            bank = %app.bank,
            status = %app.status.as_str(),
            "Credit application stored"
        );
        Ok(())
    }

    async fn get(
        &self,
        lead_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CreditApplication>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.credit_applications WHERE lead_id = ? AND id = ?",
            CREDIT_COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (lead_id, id))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row_to_application(row)?));
            }
        }
        Ok(None)
    }

    async fn list_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<CreditApplication>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.credit_applications WHERE lead_id = ?",
            CREDIT_COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (lead_id,))
            .await?;

        let mut apps = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                apps.push(row_to_application(row)?);
            }
        }
        Ok(apps)
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<CreditApplication>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.credit_applications LIMIT ?",
            CREDIT_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (limit,)).await?;

        let mut apps = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                apps.push(row_to_application(row)?);
            }
        }
        Ok(apps)
    }
}

/// In-memory credit store
#[derive(Default)]
pub struct InMemoryCreditStore {
    apps: DashMap<(Uuid, Uuid), CreditApplication>,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn upsert(&self, app: &CreditApplication) -> Result<(), PersistenceError> {
        self.apps.insert((app.lead_id, app.id), app.clone());
        Ok(())
    }

    async fn get(
        &self,
        lead_id: Uuid,
        id: Uuid,
    ) -> Result<Option<CreditApplication>, PersistenceError> {
        Ok(self.apps.get(&(lead_id, id)).map(|a| a.clone()))
    }

    async fn list_for_lead(
        &self,
        lead_id: Uuid,
    ) -> Result<Vec<CreditApplication>, PersistenceError> {
        Ok(self
            .apps
            .iter()
            .filter(|e| e.key().0 == lead_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<CreditApplication>, PersistenceError> {
        Ok(self
            .apps
            .iter()
            .take(limit.max(0) as usize)
            .map(|e| e.value().clone())
            .collect())
    }
}
