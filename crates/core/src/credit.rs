//! Credit dialogue state, applications and the document checklist

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cursor of the guided mortgage dialogue.
///
/// Main track runs `AwaitingChoice → AwaitingBank → AwaitingIncome →
/// AwaitingDownPayment → AwaitingModality → HandedOff`. The document
/// branch continues after handoff when the advisor requests papers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerStage {
    AwaitingChoice,
    AwaitingBank,
    AwaitingIncome,
    AwaitingDownPayment,
    AwaitingModality,
    HandedOff,
    AwaitingDocAvailability,
    CollectingDocs,
    PendingSignature,
}

impl BrokerStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerStage::AwaitingChoice => "awaiting_choice",
            BrokerStage::AwaitingBank => "awaiting_bank",
            BrokerStage::AwaitingIncome => "awaiting_income",
            BrokerStage::AwaitingDownPayment => "awaiting_down_payment",
            BrokerStage::AwaitingModality => "awaiting_modality",
            BrokerStage::HandedOff => "handed_off",
            BrokerStage::AwaitingDocAvailability => "awaiting_doc_availability",
            BrokerStage::CollectingDocs => "collecting_docs",
            BrokerStage::PendingSignature => "pending_signature",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "awaiting_choice" => Some(BrokerStage::AwaitingChoice),
            "awaiting_bank" => Some(BrokerStage::AwaitingBank),
            "awaiting_income" => Some(BrokerStage::AwaitingIncome),
            "awaiting_down_payment" => Some(BrokerStage::AwaitingDownPayment),
            "awaiting_modality" => Some(BrokerStage::AwaitingModality),
            "handed_off" => Some(BrokerStage::HandedOff),
            "awaiting_doc_availability" => Some(BrokerStage::AwaitingDocAvailability),
            "collecting_docs" => Some(BrokerStage::CollectingDocs),
            "pending_signature" => Some(BrokerStage::PendingSignature),
            _ => None,
        }
    }
}

impl std::fmt::Display for BrokerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application status as tracked for the advisor pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    #[default]
    Pending,
    InReview,
    SentToBank,
    Approved,
    /// Rejected but retryable with another bank or better papers.
    RejectedOn,
    /// Final rejection, no retry.
    RejectedOff,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditStatus::Pending => "pending",
            CreditStatus::InReview => "in_review",
            CreditStatus::SentToBank => "sent_to_bank",
            CreditStatus::Approved => "approved",
            CreditStatus::RejectedOn => "rejected_on",
            CreditStatus::RejectedOff => "rejected_off",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CreditStatus::Pending),
            "in_review" => Some(CreditStatus::InReview),
            "sent_to_bank" => Some(CreditStatus::SentToBank),
            "approved" => Some(CreditStatus::Approved),
            "rejected_on" => Some(CreditStatus::RejectedOn),
            "rejected_off" => Some(CreditStatus::RejectedOff),
            _ => None,
        }
    }

    /// Still being worked by an advisor. Used for load balancing.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            CreditStatus::Pending | CreditStatus::InReview | CreditStatus::SentToBank
        )
    }

    pub fn label_es(&self) -> &'static str {
        match self {
            CreditStatus::Pending => "Pendiente",
            CreditStatus::InReview => "En revisión",
            CreditStatus::SentToBank => "Enviado al banco",
            CreditStatus::Approved => "Aprobado",
            CreditStatus::RejectedOn => "Rechazado (reintentable)",
            CreditStatus::RejectedOff => "Rechazado definitivo",
        }
    }
}

/// A mortgage application handed to a credit advisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditApplication {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub advisor_id: Option<Uuid>,
    pub bank: String,
    pub monthly_income: i64,
    pub down_payment: i64,
    /// Upper end of the estimated credit range at handoff time.
    pub requested_amount: i64,
    pub status: CreditStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditApplication {
    pub fn new(lead_id: Uuid, bank: impl Into<String>, monthly_income: i64, down_payment: i64) -> Self {
        let now = Utc::now();
        let (_, high) = credit_range(monthly_income);
        Self {
            id: Uuid::new_v4(),
            lead_id,
            advisor_id: None,
            bank: bank.into(),
            monthly_income,
            down_payment,
            requested_amount: high,
            status: CreditStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Estimated credit range as income multiples: 60x to 80x.
pub fn credit_range(monthly_income: i64) -> (i64, i64) {
    (monthly_income * 60, monthly_income * 80)
}

/// Rule-of-thumb monthly payment at 30% of income.
pub fn estimated_monthly_payment(monthly_income: i64) -> i64 {
    (monthly_income as f64 * 0.30).round() as i64
}

/// Document collection tracker: six slots across four document kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocChecklist {
    pub ine_front: bool,
    pub ine_back: bool,
    /// Payroll receipts received, three required.
    pub payroll_receipts: u8,
    pub address_proof: bool,
}

pub const PAYROLL_RECEIPTS_REQUIRED: u8 = 3;
pub const DOC_SLOTS_TOTAL: u8 = 6;

impl DocChecklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register document mentions found in a customer message. Returns
    /// true when at least one slot was newly filled.
    pub fn register_mention(&mut self, text: &str) -> bool {
        let norm = crate::text::normalize(text);
        let mut changed = false;
        if norm.contains("ine") {
            let front = norm.contains("frente") || norm.contains("frontal");
            let back = norm.contains("reverso") || norm.contains("atras") || norm.contains("trasera");
            if front && !self.ine_front {
                self.ine_front = true;
                changed = true;
            }
            if back && !self.ine_back {
                self.ine_back = true;
                changed = true;
            }
            // Bare "ine" fills the first open side.
            if !front && !back {
                if !self.ine_front {
                    self.ine_front = true;
                    changed = true;
                } else if !self.ine_back {
                    self.ine_back = true;
                    changed = true;
                }
            }
        }
        if (norm.contains("nomina") || norm.contains("recibo"))
            && self.payroll_receipts < PAYROLL_RECEIPTS_REQUIRED
        {
            self.payroll_receipts += 1;
            changed = true;
        }
        if (norm.contains("comprobante") || norm.contains("domicilio")) && !self.address_proof {
            self.address_proof = true;
            changed = true;
        }
        changed
    }

    pub fn slots_filled(&self) -> u8 {
        let mut n = 0;
        if self.ine_front {
            n += 1;
        }
        if self.ine_back {
            n += 1;
        }
        n += self.payroll_receipts.min(PAYROLL_RECEIPTS_REQUIRED);
        if self.address_proof {
            n += 1;
        }
        n
    }

    pub fn is_complete(&self) -> bool {
        self.slots_filled() >= DOC_SLOTS_TOTAL
    }

    /// Six-slot progress bar, filled circles first.
    pub fn progress_bar(&self) -> String {
        let done = self.slots_filled() as usize;
        let total = DOC_SLOTS_TOTAL as usize;
        format!("{}{}", "🟢".repeat(done), "⚪".repeat(total - done))
    }

    /// Spanish labels of what is still missing.
    pub fn missing_labels(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.ine_front {
            out.push("📄 INE (frente)".to_string());
        }
        if !self.ine_back {
            out.push("📄 INE (reverso)".to_string());
        }
        let payroll_left = PAYROLL_RECEIPTS_REQUIRED.saturating_sub(self.payroll_receipts);
        if payroll_left > 0 {
            out.push(format!("📄 Recibos de nómina (faltan {payroll_left})"));
        }
        if !self.address_proof {
            out.push("📄 Comprobante de domicilio".to_string());
        }
        out
    }
}
