//! Calendar integration
//!
//! Site visits land on the sales calendar as events. The trait is the
//! seam; the stub implementation logs and fabricates event ids until a
//! real calendar backend is wired in. Event creation is always best
//! effort: the appointment row is the source of truth and survives any
//! calendar failure.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ToolsError;

/// Event to place on the calendar
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

impl CalendarEvent {
    pub fn new(
        summary: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Self {
        Self {
            summary: summary.into(),
            description: description.into(),
            location: location.into(),
            date,
            time,
            duration_minutes: 60,
        }
    }
}

/// Calendar backend seam
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Create an event, returning its id.
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, ToolsError>;

    /// Remove an event. Unknown ids are not an error.
    async fn delete_event(&self, event_id: &str) -> Result<(), ToolsError>;
}

/// Logging calendar that records events in memory. Serves development
/// and doubles as the assertion surface in tests; `set_fail` simulates
/// an outage.
#[derive(Default)]
pub struct StubCalendar {
    events: Mutex<Vec<(String, CalendarEvent)>>,
    fail: AtomicBool,
}

impl StubCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail, until turned off again.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<(String, CalendarEvent)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl CalendarService for StubCalendar {
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, ToolsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ToolsError::Calendar("calendar unavailable".to_string()));
        }

        let id = format!(
            "EVT-{}",
            uuid::Uuid::new_v4().to_string()[..8].to_uppercase()
        );
        tracing::info!(
            event_id = %id,
            summary = %event.summary,
            date = %event.date,
            time = %event.time,
            "Stub calendar: created event"
        );
        self.events.lock().push((id.clone(), event.clone()));
        Ok(id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), ToolsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ToolsError::Calendar("calendar unavailable".to_string()));
        }

        tracing::info!(event_id = %event_id, "Stub calendar: deleted event");
        self.events.lock().retain(|(id, _)| id != event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CalendarEvent {
        CalendarEvent::new(
            "Visita Monte Verde - Juan",
            "Cliente: Juan, tel 4929110022",
            "Monte Verde, Guadalupe, Zacatecas",
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn stub_creates_and_deletes() {
        let calendar = StubCalendar::new();
        let id = calendar.create_event(&sample_event()).await.unwrap();
        assert!(id.starts_with("EVT-"));
        assert_eq!(calendar.events().len(), 1);

        calendar.delete_event(&id).await.unwrap();
        assert!(calendar.events().is_empty());

        // Deleting something unknown stays quiet.
        calendar.delete_event("EVT-NADA").await.unwrap();
    }

    #[tokio::test]
    async fn outage_mode_fails_every_call() {
        let calendar = StubCalendar::new();
        calendar.set_fail(true);
        assert!(calendar.create_event(&sample_event()).await.is_err());
        assert!(calendar.delete_event("EVT-X").await.is_err());

        calendar.set_fail(false);
        assert!(calendar.create_event(&sample_event()).await.is_ok());
    }
}
