//! Lead persistence
//!
//! One row per phone. The funnel position and score live in scalar
//! columns; the dialogue cursors and the client profile ride along as
//! JSON blobs so the row stays narrow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sales_agent_core::{
    BrokerStage, ContactModality, FunnelStage, Lead, LeadCategory, PendingAction,
};

use crate::{PersistenceError, ScyllaClient};

/// Lead store trait
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn upsert(&self, lead: &Lead) -> Result<(), PersistenceError>;
    async fn get(&self, phone: &str) -> Result<Option<Lead>, PersistenceError>;
    async fn delete(&self, phone: &str) -> Result<(), PersistenceError>;
    async fn list_all(&self, limit: i32) -> Result<Vec<Lead>, PersistenceError>;
}

/// Dialogue cursors, stored as one JSON blob
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FlowState {
    broker_stage: Option<BrokerStage>,
    survey_step: u8,
    survey_completed: bool,
    pending_action: PendingAction,
    stalled_alert_sent: bool,
}

impl FlowState {
    fn of(lead: &Lead) -> Self {
        Self {
            broker_stage: lead.broker_stage,
            survey_step: lead.survey_step,
            survey_completed: lead.survey_completed,
            pending_action: lead.pending_action.clone(),
            stalled_alert_sent: lead.stalled_alert_sent,
        }
    }

    fn apply(self, lead: &mut Lead) {
        lead.broker_stage = self.broker_stage;
        lead.survey_step = self.survey_step;
        lead.survey_completed = self.survey_completed;
        lead.pending_action = self.pending_action;
        lead.stalled_alert_sent = self.stalled_alert_sent;
    }
}

/// What we know about the client, stored as one JSON blob
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProfileState {
    property_interest: Option<String>,
    needs_credit: bool,
    preferred_bank: Option<String>,
    monthly_income: Option<i64>,
    down_payment: Option<i64>,
    contact_modality: Option<ContactModality>,
}

impl ProfileState {
    fn of(lead: &Lead) -> Self {
        Self {
            property_interest: lead.property_interest.clone(),
            needs_credit: lead.needs_credit,
            preferred_bank: lead.preferred_bank.clone(),
            monthly_income: lead.monthly_income,
            down_payment: lead.down_payment,
            contact_modality: lead.contact_modality,
        }
    }

    fn apply(self, lead: &mut Lead) {
        lead.property_interest = self.property_interest;
        lead.needs_credit = self.needs_credit;
        lead.preferred_bank = self.preferred_bank;
        lead.monthly_income = self.monthly_income;
        lead.down_payment = self.down_payment;
        lead.contact_modality = self.contact_modality;
    }
}

type LeadRow = (
    String,         // phone
    Uuid,           // id
    Option<String>, // name
    String,         // status
    i32,            // score
    String,         // category
    Option<Uuid>,   // assigned_staff_id
    Option<String>, // flow_json
    Option<String>, // profile_json
    String,         // source
    i64,            // created_at
    i64,            // updated_at
);

const LEAD_COLUMNS: &str = "phone, id, name, status, score, category, assigned_staff_id, \
     flow_json, profile_json, source, created_at, updated_at";

fn row_to_lead(row: scylla::frame::response::result::Row) -> Result<Lead, PersistenceError> {
    let (
        phone,
        id,
        name,
        status,
        score,
        category,
        assigned_staff_id,
        flow_json,
        profile_json,
        source,
        created_at,
        updated_at,
    ): LeadRow = row
        .into_typed()
        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    let status = FunnelStage::from_str(&status).unwrap_or(FunnelStage::New);
    let score = score.clamp(0, 100) as u8;
    let category =
        LeadCategory::from_str(&category).unwrap_or_else(|| LeadCategory::from_score(score));

    let mut lead = Lead {
        id,
        phone,
        name,
        status,
        score,
        category,
        assigned_staff_id,
        broker_stage: None,
        survey_step: 0,
        survey_completed: false,
        pending_action: PendingAction::None,
        property_interest: None,
        needs_credit: false,
        preferred_bank: None,
        monthly_income: None,
        down_payment: None,
        contact_modality: None,
        stalled_alert_sent: false,
        source,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_else(Utc::now),
    };

    if let Some(json) = flow_json {
        let flow: FlowState = serde_json::from_str(&json)?;
        flow.apply(&mut lead);
    }
    if let Some(json) = profile_json {
        let profile: ProfileState = serde_json::from_str(&json)?;
        profile.apply(&mut lead);
    }

    Ok(lead)
}

/// ScyllaDB implementation of the lead store
#[derive(Clone)]
pub struct ScyllaLeadStore {
    client: ScyllaClient,
}

impl ScyllaLeadStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LeadStore for ScyllaLeadStore {
    async fn upsert(&self, lead: &Lead) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.leads ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            LEAD_COLUMNS
        );

        let flow_json = serde_json::to_string(&FlowState::of(lead))?;
        let profile_json = serde_json::to_string(&ProfileState::of(lead))?;

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &lead.phone,
                    lead.id,
                    &lead.name,
                    lead.status.as_str(),
                    i32::from(lead.score),
                    lead.category.as_str(),
                    lead.assigned_staff_id,
                    flow_json,
                    profile_json,
                    &lead.source,
                    lead.created_at.timestamp_millis(),
                    lead.updated_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::debug!(phone = %lead.phone, status = %lead.status.as_str(), "Lead upserted");
        Ok(())
    }

    async fn get(&self, phone: &str) -> Result<Option<Lead>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.leads WHERE phone = ?",
            LEAD_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (phone,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row_to_lead(row)?));
            }
        }
        Ok(None)
    }

    async fn delete(&self, phone: &str) -> Result<(), PersistenceError> {
        let query = format!("DELETE FROM {}.leads WHERE phone = ?", self.client.keyspace());
        self.client.session().query_unpaged(query, (phone,)).await?;
        tracing::info!(phone = %phone, "Lead deleted");
        Ok(())
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<Lead>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.leads LIMIT ?",
            LEAD_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (limit,)).await?;

        let mut leads = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                leads.push(row_to_lead(row)?);
            }
        }
        Ok(leads)
    }
}

/// In-memory lead store for tests and single-node runs without ScyllaDB
#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: DashMap<String, Lead>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn upsert(&self, lead: &Lead) -> Result<(), PersistenceError> {
        self.leads.insert(lead.phone.clone(), lead.clone());
        Ok(())
    }

    async fn get(&self, phone: &str) -> Result<Option<Lead>, PersistenceError> {
        Ok(self.leads.get(phone).map(|l| l.clone()))
    }

    async fn delete(&self, phone: &str) -> Result<(), PersistenceError> {
        self.leads.remove(phone);
        Ok(())
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<Lead>, PersistenceError> {
        Ok(self
            .leads
            .iter()
            .take(limit.max(0) as usize)
            .map(|e| e.value().clone())
            .collect())
    }
}
