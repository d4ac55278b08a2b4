//! Team member records and role resolution

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lead::PendingAction;

/// Team role, resolved from the free-form `role` column by keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Seller,
    CreditAdvisor,
    Executive,
    Marketing,
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Seller => "seller",
            StaffRole::CreditAdvisor => "credit_advisor",
            StaffRole::Executive => "executive",
            StaffRole::Marketing => "marketing",
            StaffRole::Admin => "admin",
        }
    }

    /// Map a raw role string onto a handler role. Checks run in order;
    /// anything unmatched falls back to `Seller`.
    pub fn from_raw(raw: &str) -> Self {
        let norm = crate::text::normalize(raw);
        if norm.contains("admin") || norm.contains("coordinador") || norm.contains("coordinadora") {
            return StaffRole::Admin;
        }
        if norm.contains("ceo") || norm.contains("director") || norm.contains("gerente") {
            return StaffRole::Executive;
        }
        if norm.contains("asesor") || norm.contains("hipotec") || norm.contains("credito") {
            return StaffRole::CreditAdvisor;
        }
        if norm.contains("agencia") || norm.contains("marketing") {
            return StaffRole::Marketing;
        }
        StaffRole::Seller
    }

    /// Admins and executives operate on any lead; everyone else only on
    /// leads assigned to them.
    pub fn bypasses_ownership(&self) -> bool {
        matches!(self, StaffRole::Admin | StaffRole::Executive)
    }

    /// Spanish label for notification footers.
    pub fn label_es(&self) -> &'static str {
        match self {
            StaffRole::Seller => "Vendedor",
            StaffRole::CreditAdvisor => "Asesor hipotecario",
            StaffRole::Executive => "Directivo",
            StaffRole::Marketing => "Marketing",
            StaffRole::Admin => "Coordinación",
        }
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An employee reachable over WhatsApp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Uuid,
    pub name: String,
    /// Digits-only phone, matched by its last 10 digits.
    pub phone: String,
    /// Raw role column as stored; `role()` resolves it.
    pub role_raw: String,
    pub active: bool,
    /// Exact bank names this advisor covers, empty for non-advisors.
    pub banks: Vec<String>,
    /// Vacation days during which the member must not receive handoffs.
    pub vacation_days: Vec<NaiveDate>,
    pub pending_action: PendingAction,
    pub created_at: DateTime<Utc>,
}

impl StaffMember {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, role_raw: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            phone: phone.into(),
            role_raw: role_raw.into(),
            active: true,
            banks: Vec::new(),
            vacation_days: Vec::new(),
            pending_action: PendingAction::None,
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> StaffRole {
        StaffRole::from_raw(&self.role_raw)
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    pub fn on_vacation(&self, day: NaiveDate) -> bool {
        self.vacation_days.contains(&day)
    }

    /// Available to take work today: active and not on vacation.
    pub fn available(&self, today: NaiveDate) -> bool {
        self.active && !self.on_vacation(today)
    }

    pub fn covers_bank(&self, bank: &str) -> bool {
        let wanted = crate::text::normalize(bank);
        self.banks.iter().any(|b| crate::text::normalize(b) == wanted)
    }
}
