//! Outbox worker
//!
//! Drains the task queue on a fixed poll interval: due tasks run against
//! the gateway or the calendar, successes are marked done, failures are
//! rescheduled with exponential backoff until the attempt budget runs
//! out and the task is parked dead. The webhook path never waits on any
//! of this; it only enqueues.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use sales_agent_config::OutboxConfig;
use sales_agent_persistence::{AppointmentStore, OutboxStore, OutboxTask, TaskKind};

use crate::calendar::{CalendarEvent, CalendarService};
use crate::gateway::MessageGateway;
use crate::ToolsError;

/// Tasks taken per poll.
const BATCH_LIMIT: usize = 50;

/// Background processor for queued side effects
pub struct OutboxWorker {
    store: Arc<dyn OutboxStore>,
    appointments: Arc<dyn AppointmentStore>,
    gateway: Arc<dyn MessageGateway>,
    calendar: Arc<dyn CalendarService>,
    config: OutboxConfig,
}

impl OutboxWorker {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        appointments: Arc<dyn AppointmentStore>,
        gateway: Arc<dyn MessageGateway>,
        calendar: Arc<dyn CalendarService>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            appointments,
            gateway,
            calendar,
            config,
        }
    }

    /// Spawn the polling loop. Returns the shutdown sender; flipping it
    /// to `true` runs one last drain so queued sends go out before exit.
    pub fn start(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let worker = self;
        let poll = std::time::Duration::from_secs(worker.config.poll_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = worker.drain(Utc::now()).await {
                            tracing::warn!(error = %e, "Outbox poll failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            if let Err(e) = worker.drain(Utc::now()).await {
                                tracing::warn!(error = %e, "Final outbox drain failed");
                            }
                            tracing::info!("Outbox worker shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// One pass over the due tasks. Individual task failures are
    /// accounted per task and never abort the pass.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<usize, ToolsError> {
        let batch = self.store.due(now, BATCH_LIMIT).await?;
        let count = batch.len();

        for task in &batch {
            self.run_task(task, now).await;
        }
        Ok(count)
    }

    async fn run_task(&self, task: &OutboxTask, now: DateTime<Utc>) {
        match self.execute(task).await {
            Ok(()) => {
                counter!("sales_agent_outbox_tasks_total",
                         "kind" => task.kind.as_str(), "result" => "done")
                .increment(1);
                if let Err(e) = self.store.mark_done(task.id).await {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to mark task done");
                }
            }
            Err(e) => {
                let attempts = task.attempts + 1;
                let exhausted = attempts >= self.config.max_attempts as i32;
                let next_run_at = if e.is_retryable() && !exhausted {
                    Some(now + self.backoff(attempts))
                } else {
                    None
                };

                match next_run_at {
                    Some(at) => {
                        counter!("sales_agent_outbox_tasks_total",
                                 "kind" => task.kind.as_str(), "result" => "retry")
                        .increment(1);
                        tracing::warn!(
                            task_id = %task.id,
                            kind = %task.kind.as_str(),
                            attempts,
                            retry_at = %at,
                            error = %e,
                            "Outbox task failed, will retry"
                        );
                    }
                    None => {
                        counter!("sales_agent_outbox_tasks_total",
                                 "kind" => task.kind.as_str(), "result" => "dead")
                        .increment(1);
                        tracing::error!(
                            task_id = %task.id,
                            kind = %task.kind.as_str(),
                            attempts,
                            error = %e,
                            "Outbox task dead"
                        );
                    }
                }

                if let Err(e2) = self
                    .store
                    .mark_failed(task.id, &e.to_string(), attempts, next_run_at)
                    .await
                {
                    tracing::warn!(task_id = %task.id, error = %e2, "Failed to record task failure");
                }
            }
        }
    }

    async fn execute(&self, task: &OutboxTask) -> Result<(), ToolsError> {
        match task.kind {
            TaskKind::SendMessage => {
                let to = payload_str(task, "to")?;
                let body = payload_str(task, "body")?;
                self.gateway.send(to, body).await
            }
            TaskKind::FollowUp => {
                let phone = payload_str(task, "phone")?;
                let note = payload_str(task, "note")?;
                self.gateway.send(phone, note).await
            }
            TaskKind::CalendarCreate => {
                let lead_phone = payload_str(task, "lead_phone")?;
                let appointment_id = payload_uuid(task, "appointment_id")?;
                let date = NaiveDate::parse_from_str(payload_str(task, "date")?, "%Y-%m-%d")
                    .map_err(|e| ToolsError::Task(format!("bad date: {e}")))?;
                let time = NaiveTime::parse_from_str(payload_str(task, "time")?, "%H:%M")
                    .map_err(|e| ToolsError::Task(format!("bad time: {e}")))?;

                let event = CalendarEvent::new(
                    payload_str(task, "summary")?,
                    payload_str(task, "description")?,
                    payload_str(task, "location")?,
                    date,
                    time,
                );
                let event_id = self.calendar.create_event(&event).await?;
                self.appointments
                    .set_calendar_event(lead_phone, appointment_id, &event_id)
                    .await?;
                Ok(())
            }
            TaskKind::CalendarDelete => {
                let event_id = payload_str(task, "event_id")?;
                self.calendar.delete_event(event_id).await
            }
        }
    }

    /// Delay before attempt `attempts + 1`: base doubled per failure.
    fn backoff(&self, attempts: i32) -> chrono::Duration {
        let doublings = attempts.saturating_sub(1).clamp(0, 10) as u32;
        let secs = self
            .config
            .base_backoff_seconds
            .saturating_mul(1u64 << doublings);
        chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64)
    }
}

fn payload_str<'a>(task: &'a OutboxTask, key: &str) -> Result<&'a str, ToolsError> {
    task.payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolsError::Task(format!("{} payload missing {key}", task.kind.as_str())))
}

fn payload_uuid(task: &OutboxTask, key: &str) -> Result<Uuid, ToolsError> {
    let raw = payload_str(task, key)?;
    Uuid::parse_str(raw).map_err(|e| ToolsError::Task(format!("bad {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sales_agent_core::{Appointment, AppointmentKind};
    use sales_agent_persistence::{InMemoryAppointmentStore, InMemoryOutboxStore, TaskStatus};

    use crate::calendar::StubCalendar;
    use crate::gateway::SimulatedGateway;

    struct Fixture {
        outbox: Arc<InMemoryOutboxStore>,
        appointments: Arc<InMemoryAppointmentStore>,
        gateway: Arc<SimulatedGateway>,
        calendar: Arc<StubCalendar>,
        worker: OutboxWorker,
    }

    fn fixture() -> Fixture {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let gateway = Arc::new(SimulatedGateway::new());
        let calendar = Arc::new(StubCalendar::new());
        let worker = OutboxWorker::new(
            outbox.clone(),
            appointments.clone(),
            gateway.clone(),
            calendar.clone(),
            OutboxConfig::default(),
        );
        Fixture {
            outbox,
            appointments,
            gateway,
            calendar,
            worker,
        }
    }

    #[tokio::test]
    async fn sends_and_follow_ups_reach_the_gateway() {
        let f = fixture();

        let send = OutboxTask::send_message("4929110022", "Hola Juan");
        // Capture `now` after construction: `send_message` stamps
        // `run_at = Utc::now()`, so an earlier `now` would miss it.
        let now = Utc::now();
        let nudge = OutboxTask::follow_up("4929110022", "¿Sigues interesado? 🏠", now);
        f.outbox.enqueue(&send).await.unwrap();
        f.outbox.enqueue(&nudge).await.unwrap();

        let processed = f.worker.drain(now).await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(f.gateway.sent_to("4929110022").len(), 2);
        assert_eq!(f.outbox.get(send.id).unwrap().status, TaskStatus::Done);
        assert_eq!(f.outbox.get(nudge.id).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn future_follow_up_waits_for_its_time() {
        let f = fixture();
        let now = Utc::now();

        let later = now + Duration::hours(24);
        let nudge = OutboxTask::follow_up("4929110022", "nudge", later);
        f.outbox.enqueue(&nudge).await.unwrap();

        assert_eq!(f.worker.drain(now).await.unwrap(), 0);
        assert!(f.gateway.sent().is_empty());

        assert_eq!(f.worker.drain(later + Duration::seconds(1)).await.unwrap(), 1);
        assert_eq!(f.gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn calendar_create_writes_the_event_id_back() {
        let f = fixture();
        let appt = Appointment::new(
            Uuid::new_v4(),
            "Juan Pérez".to_string(),
            "4929110022".to_string(),
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        f.appointments.upsert(&appt).await.unwrap();

        let task = OutboxTask::calendar_create(
            &appt.lead_phone,
            appt.id,
            "Visita Monte Verde - Juan Pérez",
            "Tel: 4929110022",
            "Monte Verde, Guadalupe",
            "2025-03-10",
            "11:00",
        );
        f.outbox.enqueue(&task).await.unwrap();
        f.worker.drain(Utc::now()).await.unwrap();

        assert_eq!(f.calendar.events().len(), 1);
        let stored = f
            .appointments
            .get(&appt.lead_phone, appt.id)
            .await
            .unwrap()
            .unwrap();
        let event_id = stored.calendar_event_id.unwrap();
        assert!(event_id.starts_with("EVT-"));
        assert_eq!(f.outbox.get(task.id).unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn failures_back_off_then_die() {
        let f = fixture();
        f.calendar.set_fail(true);

        let task = OutboxTask::calendar_delete("EVT-X");
        // Capture `now` after construction: `calendar_delete` stamps
        // `run_at = Utc::now()`, so an earlier `now` would miss it.
        let mut now = Utc::now();
        f.outbox.enqueue(&task).await.unwrap();

        // Attempts 1 through 4 reschedule with growing delays.
        for expected_attempts in 1..5 {
            f.worker.drain(now).await.unwrap();
            let stored = f.outbox.get(task.id).unwrap();
            if expected_attempts < 5 {
                assert_eq!(stored.status, TaskStatus::Pending);
                assert_eq!(stored.attempts, expected_attempts);
                assert!(stored.run_at > now);
            }
            now = stored.run_at + Duration::seconds(1);
        }

        // Attempt 5 exhausts the budget.
        f.worker.drain(now).await.unwrap();
        let stored = f.outbox.get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Dead);
        assert_eq!(stored.attempts, 5);
        assert!(stored.last_error.is_some());

        // Dead tasks stay dead on later passes.
        assert_eq!(f.worker.drain(now + Duration::days(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_tasks_die_without_retry() {
        let f = fixture();
        let mut task = OutboxTask::send_message("x", "y");
        task.payload = serde_json::json!({ "wrong": true });
        f.outbox.enqueue(&task).await.unwrap();

        f.worker.drain(Utc::now()).await.unwrap();
        let stored = f.outbox.get(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Dead);
        assert_eq!(stored.attempts, 1);
        assert!(f.gateway.sent().is_empty());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let f = fixture();
        assert_eq!(f.worker.backoff(1), Duration::seconds(30));
        assert_eq!(f.worker.backoff(2), Duration::seconds(60));
        assert_eq!(f.worker.backoff(3), Duration::seconds(120));
        assert_eq!(f.worker.backoff(4), Duration::seconds(240));
    }
}
