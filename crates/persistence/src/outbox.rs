//! Outbound task queue
//!
//! Sends and scheduled follow-ups go through here instead of firing
//! inline: the worker in the tools crate polls for due tasks, runs
//! them, and reschedules failures with backoff until they die.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, ScyllaClient};

/// What a task does when picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Outbound WhatsApp message; payload `{to, body}`
    SendMessage,
    /// Scheduled nudge for a lead; payload `{phone, note}`
    FollowUp,
    /// Calendar event for an appointment; payload carries the event
    /// fields plus `{lead_phone, appointment_id}` for the write-back
    CalendarCreate,
    /// Removal of a calendar event; payload `{event_id}`
    CalendarDelete,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SendMessage => "send_message",
            TaskKind::FollowUp => "follow_up",
            TaskKind::CalendarCreate => "calendar_create",
            TaskKind::CalendarDelete => "calendar_delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "send_message" => Some(TaskKind::SendMessage),
            "follow_up" => Some(TaskKind::FollowUp),
            "calendar_create" => Some(TaskKind::CalendarCreate),
            "calendar_delete" => Some(TaskKind::CalendarDelete),
            _ => None,
        }
    }
}

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
    /// Exhausted its attempts; kept for inspection until the row expires
    Dead,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "done" => Some(TaskStatus::Done),
            "dead" => Some(TaskStatus::Dead),
            _ => None,
        }
    }
}

/// One queued task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxTask {
    fn new(kind: TaskKind, payload: serde_json::Value, run_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            run_at,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Immediate outbound message
    pub fn send_message(to: &str, body: &str) -> Self {
        Self::new(
            TaskKind::SendMessage,
            serde_json::json!({ "to": to, "body": body }),
            Utc::now(),
        )
    }

    /// Nudge scheduled for later
    pub fn follow_up(phone: &str, note: &str, run_at: DateTime<Utc>) -> Self {
        Self::new(
            TaskKind::FollowUp,
            serde_json::json!({ "phone": phone, "note": note }),
            run_at,
        )
    }

    /// Calendar event for a booked appointment. The worker writes the
    /// resulting event id back onto the appointment row.
    #[allow(clippy::too_many_arguments)]
    pub fn calendar_create(
        lead_phone: &str,
        appointment_id: Uuid,
        summary: &str,
        description: &str,
        location: &str,
        date: &str,
        time: &str,
    ) -> Self {
        Self::new(
            TaskKind::CalendarCreate,
            serde_json::json!({
                "lead_phone": lead_phone,
                "appointment_id": appointment_id,
                "summary": summary,
                "description": description,
                "location": location,
                "date": date,
                "time": time,
            }),
            Utc::now(),
        )
    }

    /// Removal of the calendar event behind a cancelled appointment.
    pub fn calendar_delete(event_id: &str) -> Self {
        Self::new(
            TaskKind::CalendarDelete,
            serde_json::json!({ "event_id": event_id }),
            Utc::now(),
        )
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.run_at <= now
    }

    /// Phone a pending follow-up targets, if this is one.
    pub fn follow_up_phone(&self) -> Option<&str> {
        if self.kind != TaskKind::FollowUp {
            return None;
        }
        self.payload.get("phone").and_then(|v| v.as_str())
    }
}

/// Outbox store trait
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, task: &OutboxTask) -> Result<(), PersistenceError>;
    /// Due tasks, soonest first
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxTask>, PersistenceError>;
    async fn mark_done(&self, id: Uuid) -> Result<(), PersistenceError>;
    /// Record a failed attempt. `next_run_at = None` kills the task.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        attempts: i32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), PersistenceError>;
    /// Drop the pending follow-ups aimed at a phone. Runs when the lead
    /// answers on their own so stale nudges never go out. Returns how
    /// many tasks were cancelled.
    async fn cancel_follow_ups(&self, phone: &str) -> Result<usize, PersistenceError>;
}

const OUTBOX_COLUMNS: &str =
    "id, kind, payload_json, status, attempts, run_at, last_error, created_at, updated_at";

type OutboxRow = (
    Uuid,
    String,
    String,
    String,
    i32,
    i64,
    Option<String>,
    i64,
    i64,
);

fn row_to_task(row: scylla::frame::response::result::Row) -> Result<OutboxTask, PersistenceError> {
    let (id, kind, payload_json, status, attempts, run_at, last_error, created_at, updated_at): OutboxRow =
        row.into_typed()
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    Ok(OutboxTask {
        id,
        kind: TaskKind::from_str(&kind)
            .ok_or_else(|| PersistenceError::InvalidData(format!("unknown task kind {kind}")))?,
        payload: serde_json::from_str(&payload_json)?,
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Pending),
        attempts,
        run_at: DateTime::from_timestamp_millis(run_at).unwrap_or_else(Utc::now),
        last_error,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_else(Utc::now),
    })
}

/// ScyllaDB implementation of the outbox store
#[derive(Clone)]
pub struct ScyllaOutboxStore {
    client: ScyllaClient,
}

impl ScyllaOutboxStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn scan(&self) -> Result<Vec<OutboxTask>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.outbox_tasks LIMIT 1000",
            OUTBOX_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, &[]).await?;

        let mut tasks = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                tasks.push(row_to_task(row)?);
            }
        }
        Ok(tasks)
    }
}

#[async_trait]
impl OutboxStore for ScyllaOutboxStore {
    async fn enqueue(&self, task: &OutboxTask) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.outbox_tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            OUTBOX_COLUMNS
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    task.id,
                    task.kind.as_str(),
                    serde_json::to_string(&task.payload)?,
                    task.status.as_str(),
                    task.attempts,
                    task.run_at.timestamp_millis(),
                    &task.last_error,
                    task.created_at.timestamp_millis(),
                    task.updated_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::debug!(task_id = %task.id, kind = %task.kind.as_str(), "Task enqueued");
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxTask>, PersistenceError> {
        let mut tasks: Vec<OutboxTask> = self
            .scan()
            .await?
            .into_iter()
            .filter(|t| t.is_due(now))
            .collect();
        tasks.sort_by_key(|t| t.run_at);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn mark_done(&self, id: Uuid) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.outbox_tasks SET status = ?, updated_at = ? WHERE id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (TaskStatus::Done.as_str(), Utc::now().timestamp_millis(), id),
            )
            .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        attempts: i32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), PersistenceError> {
        let (status, run_at) = match next_run_at {
            Some(at) => (TaskStatus::Pending, at),
            None => (TaskStatus::Dead, Utc::now()),
        };

        let query = format!(
            "UPDATE {}.outbox_tasks SET status = ?, attempts = ?, run_at = ?, last_error = ?, updated_at = ?
             WHERE id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    status.as_str(),
                    attempts,
                    run_at.timestamp_millis(),
                    error,
                    Utc::now().timestamp_millis(),
                    id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn cancel_follow_ups(&self, phone: &str) -> Result<usize, PersistenceError> {
        let targets: Vec<Uuid> = self
            .scan()
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && t.follow_up_phone() == Some(phone))
            .map(|t| t.id)
            .collect();

        for id in &targets {
            self.mark_done(*id).await?;
        }
        if !targets.is_empty() {
            tracing::debug!(phone = %phone, count = targets.len(), "Cancelled pending follow-ups");
        }
        Ok(targets.len())
    }
}

/// In-memory outbox store
#[derive(Default)]
pub struct InMemoryOutboxStore {
    tasks: DashMap<Uuid, OutboxTask>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<OutboxTask> {
        self.tasks.get(&id).map(|t| t.clone())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, task: &OutboxTask) -> Result<(), PersistenceError> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxTask>, PersistenceError> {
        let mut due: Vec<OutboxTask> = self
            .tasks
            .iter()
            .filter(|e| e.value().is_due(now))
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|t| t.run_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_done(&self, id: Uuid) -> Result<(), PersistenceError> {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Done;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        attempts: i32,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), PersistenceError> {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.attempts = attempts;
            task.last_error = Some(error.to_string());
            task.updated_at = Utc::now();
            match next_run_at {
                Some(at) => {
                    task.status = TaskStatus::Pending;
                    task.run_at = at;
                }
                None => task.status = TaskStatus::Dead,
            }
        }
        Ok(())
    }

    async fn cancel_follow_ups(&self, phone: &str) -> Result<usize, PersistenceError> {
        let mut cancelled = 0;
        for mut entry in self.tasks.iter_mut() {
            let task = entry.value_mut();
            if task.status == TaskStatus::Pending && task.follow_up_phone() == Some(phone) {
                task.status = TaskStatus::Done;
                task.updated_at = Utc::now();
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }
}
