//! Appointment records for sales visits and credit advisories

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    #[default]
    SalesVisit,
    CreditAdvisory,
}

impl AppointmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentKind::SalesVisit => "sales_visit",
            AppointmentKind::CreditAdvisory => "credit_advisory",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sales_visit" => Some(AppointmentKind::SalesVisit),
            "credit_advisory" => Some(AppointmentKind::CreditAdvisory),
            _ => None,
        }
    }

    pub fn label_es(&self) -> &'static str {
        match self {
            AppointmentKind::SalesVisit => "Visita",
            AppointmentKind::CreditAdvisory => "Asesoría hipotecaria",
        }
    }
}

/// A booked visit. At most one `Scheduled` appointment may exist per
/// (lead, property); the scheduler re-checks recency just before insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub lead_name: String,
    pub lead_phone: String,
    /// Development name, "Por definir" while unknown.
    pub property: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub kind: AppointmentKind,
    pub staff_id: Option<Uuid>,
    /// Calendar event id when the best-effort create succeeded.
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        lead_id: Uuid,
        lead_name: impl Into<String>,
        lead_phone: impl Into<String>,
        property: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
        kind: AppointmentKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            lead_name: lead_name.into(),
            lead_phone: lead_phone.into(),
            property: property.into(),
            date,
            time,
            status: AppointmentStatus::Scheduled,
            kind,
            staff_id: None,
            calendar_event_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
        ] {
            assert_eq!(AppointmentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::from_str("nope"), None);
    }

    #[test]
    fn only_scheduled_is_active() {
        let mut appt = Appointment::new(
            Uuid::new_v4(),
            "Carlos Pérez",
            "5214921234567",
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 21).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        assert!(appt.is_active());
        appt.status = AppointmentStatus::Cancelled;
        assert!(!appt.is_active());
    }
}
