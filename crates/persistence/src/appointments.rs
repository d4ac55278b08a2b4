//! Appointment persistence

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use sales_agent_core::{Appointment, AppointmentKind, AppointmentStatus};

use crate::{PersistenceError, ScyllaClient};

/// Appointment store trait
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn upsert(&self, appointment: &Appointment) -> Result<(), PersistenceError>;
    async fn get(
        &self,
        lead_phone: &str,
        id: Uuid,
    ) -> Result<Option<Appointment>, PersistenceError>;
    async fn list_for_lead(&self, lead_phone: &str) -> Result<Vec<Appointment>, PersistenceError>;
    /// Whole table, bounded. Day agendas filter in code; the table is
    /// partitioned for the per-lead path, which is the hot one.
    async fn list_all(&self, limit: i32) -> Result<Vec<Appointment>, PersistenceError>;
    async fn update_status(
        &self,
        lead_phone: &str,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<(), PersistenceError>;
    async fn set_calendar_event(
        &self,
        lead_phone: &str,
        id: Uuid,
        event_id: &str,
    ) -> Result<(), PersistenceError>;
}

const APPOINTMENT_COLUMNS: &str = "lead_phone, id, lead_id, lead_name, property, date, time, \
     status, kind, staff_id, calendar_event_id, created_at";

type AppointmentRow = (
    String,
    Uuid,
    Uuid,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<Uuid>,
    Option<String>,
    i64,
);

fn row_to_appointment(
    row: scylla::frame::response::result::Row,
) -> Result<Appointment, PersistenceError> {
    let (
        lead_phone,
        id,
        lead_id,
        lead_name,
        property,
        date,
        time,
        status,
        kind,
        staff_id,
        calendar_event_id,
        created_at,
    ): AppointmentRow = row
        .into_typed()
        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    Ok(Appointment {
        id,
        lead_id,
        lead_name,
        lead_phone,
        property,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| PersistenceError::InvalidData(format!("bad date {date}: {e}")))?,
        time: NaiveTime::parse_from_str(&time, "%H:%M")
            .map_err(|e| PersistenceError::InvalidData(format!("bad time {time}: {e}")))?,
        status: AppointmentStatus::from_str(&status).unwrap_or(AppointmentStatus::Scheduled),
        kind: AppointmentKind::from_str(&kind).unwrap_or(AppointmentKind::SalesVisit),
        staff_id,
        calendar_event_id,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
    })
}

/// ScyllaDB implementation of the appointment store
#[derive(Clone)]
pub struct ScyllaAppointmentStore {
    client: ScyllaClient,
}

impl ScyllaAppointmentStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AppointmentStore for ScyllaAppointmentStore {
    async fn upsert(&self, appointment: &Appointment) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.appointments ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace(),
            APPOINTMENT_COLUMNS
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &appointment.lead_phone,
                    appointment.id,
                    appointment.lead_id,
                    &appointment.lead_name,
                    &appointment.property,
                    appointment.date.to_string(),
                    appointment.time.format("%H:%M").to_string(),
                    appointment.status.as_str(),
                    appointment.kind.as_str(),
                    appointment.staff_id,
                    &appointment.calendar_event_id,
                    appointment.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(
            appointment_id = %appointment.id,
            lead_phone = %appointment.lead_phone,
            property = %appointment.property,
            date = %appointment.date,
            "Appointment stored"
        );
        Ok(())
    }

    async fn get(
        &self,
        lead_phone: &str,
        id: Uuid,
    ) -> Result<Option<Appointment>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.appointments WHERE lead_phone = ? AND id = ?",
            APPOINTMENT_COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (lead_phone, id))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row_to_appointment(row)?));
            }
        }
        Ok(None)
    }

    async fn list_for_lead(&self, lead_phone: &str) -> Result<Vec<Appointment>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.appointments WHERE lead_phone = ?",
            APPOINTMENT_COLUMNS,
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (lead_phone,))
            .await?;

        let mut appointments = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                appointments.push(row_to_appointment(row)?);
            }
        }
        Ok(appointments)
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<Appointment>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM {}.appointments LIMIT ?",
            APPOINTMENT_COLUMNS,
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (limit,)).await?;

        let mut appointments = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                appointments.push(row_to_appointment(row)?);
            }
        }
        Ok(appointments)
    }

    async fn update_status(
        &self,
        lead_phone: &str,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.appointments SET status = ? WHERE lead_phone = ? AND id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(query, (status.as_str(), lead_phone, id))
            .await?;

        tracing::info!(appointment_id = %id, status = %status.as_str(), "Appointment status updated");
        Ok(())
    }

    async fn set_calendar_event(
        &self,
        lead_phone: &str,
        id: Uuid,
        event_id: &str,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.appointments SET calendar_event_id = ? WHERE lead_phone = ? AND id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(query, (event_id, lead_phone, id))
            .await?;
        Ok(())
    }
}

/// In-memory appointment store
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: DashMap<(String, Uuid), Appointment>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn upsert(&self, appointment: &Appointment) -> Result<(), PersistenceError> {
        self.appointments.insert(
            (appointment.lead_phone.clone(), appointment.id),
            appointment.clone(),
        );
        Ok(())
    }

    async fn get(
        &self,
        lead_phone: &str,
        id: Uuid,
    ) -> Result<Option<Appointment>, PersistenceError> {
        Ok(self
            .appointments
            .get(&(lead_phone.to_string(), id))
            .map(|a| a.clone()))
    }

    async fn list_for_lead(&self, lead_phone: &str) -> Result<Vec<Appointment>, PersistenceError> {
        Ok(self
            .appointments
            .iter()
            .filter(|e| e.key().0 == lead_phone)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_all(&self, limit: i32) -> Result<Vec<Appointment>, PersistenceError> {
        Ok(self
            .appointments
            .iter()
            .take(limit.max(0) as usize)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_status(
        &self,
        lead_phone: &str,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<(), PersistenceError> {
        if let Some(mut entry) = self.appointments.get_mut(&(lead_phone.to_string(), id)) {
            entry.status = status;
        }
        Ok(())
    }

    async fn set_calendar_event(
        &self,
        lead_phone: &str,
        id: Uuid,
        event_id: &str,
    ) -> Result<(), PersistenceError> {
        if let Some(mut entry) = self.appointments.get_mut(&(lead_phone.to_string(), id)) {
            entry.calendar_event_id = Some(event_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Appointment {
        Appointment::new(
            Uuid::new_v4(),
            "Laura",
            "5214921112233",
            "MONTE VERDE",
            NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        )
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryAppointmentStore::new();
        let apt = fixture();
        store.upsert(&apt).await.unwrap();

        let loaded = store.get("5214921112233", apt.id).await.unwrap().unwrap();
        assert_eq!(loaded.property, "MONTE VERDE");
        assert!(loaded.is_active());

        store
            .update_status("5214921112233", apt.id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        let loaded = store.get("5214921112233", apt.id).await.unwrap().unwrap();
        assert!(!loaded.is_active());
    }

    #[tokio::test]
    async fn list_for_lead_filters_by_phone() {
        let store = InMemoryAppointmentStore::new();
        store.upsert(&fixture()).await.unwrap();

        let mut other = fixture();
        other.lead_phone = "5214920000000".to_string();
        store.upsert(&other).await.unwrap();

        assert_eq!(store.list_for_lead("5214921112233").await.unwrap().len(), 1);
        assert_eq!(store.list_all(10).await.unwrap().len(), 2);
    }
}
