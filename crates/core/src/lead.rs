//! Lead record, funnel stages and the derived score/category tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::DocChecklist;

/// Sales funnel stage.
///
/// The main path is a fixed order; `Fallen` is a side branch reachable
/// from any non-terminal stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    #[default]
    New,
    Contacted,
    Scheduled,
    Visited,
    Negotiation,
    Reserved,
    Closed,
    Delivered,
    Fallen,
}

/// Main funnel path in order. `Fallen` is deliberately absent.
pub const FUNNEL_ORDER: [FunnelStage; 8] = [
    FunnelStage::New,
    FunnelStage::Contacted,
    FunnelStage::Scheduled,
    FunnelStage::Visited,
    FunnelStage::Negotiation,
    FunnelStage::Reserved,
    FunnelStage::Closed,
    FunnelStage::Delivered,
];

impl FunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::New => "new",
            FunnelStage::Contacted => "contacted",
            FunnelStage::Scheduled => "scheduled",
            FunnelStage::Visited => "visited",
            FunnelStage::Negotiation => "negotiation",
            FunnelStage::Reserved => "reserved",
            FunnelStage::Closed => "closed",
            FunnelStage::Delivered => "delivered",
            FunnelStage::Fallen => "fallen",
        }
    }

    /// Parse a stored stage key or a Spanish alias as staff would type it.
    pub fn from_str(s: &str) -> Option<Self> {
        let norm = crate::text::normalize(s);
        match norm.as_str() {
            "new" | "nuevo" | "nueva" => Some(FunnelStage::New),
            "contacted" | "contactado" | "contactada" => Some(FunnelStage::Contacted),
            "scheduled" | "cita" | "agendado" | "cita agendada" => Some(FunnelStage::Scheduled),
            "visited" | "visito" | "visita hecha" => Some(FunnelStage::Visited),
            "negotiation" | "negociacion" | "negociando" => Some(FunnelStage::Negotiation),
            "reserved" | "reservado" | "apartado" => Some(FunnelStage::Reserved),
            "closed" | "cerrado" | "vendido" => Some(FunnelStage::Closed),
            "delivered" | "entregado" | "entregada" => Some(FunnelStage::Delivered),
            "fallen" | "caido" | "perdido" | "caida" => Some(FunnelStage::Fallen),
            _ => None,
        }
    }

    /// Spanish label used in staff-facing messages.
    pub fn label_es(&self) -> &'static str {
        match self {
            FunnelStage::New => "NUEVO",
            FunnelStage::Contacted => "CONTACTADO",
            FunnelStage::Scheduled => "CITA AGENDADA",
            FunnelStage::Visited => "VISITÓ",
            FunnelStage::Negotiation => "NEGOCIACIÓN",
            FunnelStage::Reserved => "RESERVADO",
            FunnelStage::Closed => "CERRADO",
            FunnelStage::Delivered => "ENTREGADO",
            FunnelStage::Fallen => "CAÍDO",
        }
    }

    /// Static stage → score table. Score is a pure function of the new
    /// stage, never of the prior score.
    pub fn base_score(&self) -> u8 {
        match self {
            FunnelStage::New => 20,
            FunnelStage::Contacted => 35,
            FunnelStage::Scheduled => 55,
            FunnelStage::Visited => 75,
            FunnelStage::Negotiation => 85,
            FunnelStage::Reserved => 90,
            FunnelStage::Closed => 100,
            FunnelStage::Delivered => 100,
            FunnelStage::Fallen => 0,
        }
    }

    /// Delivered is the end of the main path; fallen is the lost branch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FunnelStage::Delivered | FunnelStage::Fallen)
    }

    fn order_index(&self) -> Option<usize> {
        FUNNEL_ORDER.iter().position(|s| s == self)
    }

    /// One step forward along the main path. `None` at the last stage
    /// or from `Fallen`.
    pub fn next(&self) -> Option<FunnelStage> {
        let idx = self.order_index()?;
        FUNNEL_ORDER.get(idx + 1).copied()
    }

    /// One step back along the main path. `None` at the first stage or
    /// from `Fallen`.
    pub fn previous(&self) -> Option<FunnelStage> {
        let idx = self.order_index()?;
        idx.checked_sub(1).and_then(|i| FUNNEL_ORDER.get(i).copied())
    }
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lead temperature tag derived from stage/score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCategory {
    #[default]
    Cold,
    Warm,
    Hot,
    Client,
}

impl LeadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadCategory::Cold => "COLD",
            LeadCategory::Warm => "WARM",
            LeadCategory::Hot => "HOT",
            LeadCategory::Client => "CLIENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "COLD" => Some(LeadCategory::Cold),
            "WARM" => Some(LeadCategory::Warm),
            "HOT" => Some(LeadCategory::Hot),
            "CLIENT" | "CLIENTE" => Some(LeadCategory::Client),
            _ => None,
        }
    }

    /// Threshold mapping: ≥70 HOT, ≥40 WARM, else COLD.
    pub fn from_score(score: u8) -> Self {
        if score >= 70 {
            LeadCategory::Hot
        } else if score >= 40 {
            LeadCategory::Warm
        } else {
            LeadCategory::Cold
        }
    }

    /// Category override for stages where the temperature is forced
    /// regardless of the numeric score.
    pub fn forced_for_stage(stage: FunnelStage) -> Option<Self> {
        match stage {
            FunnelStage::Negotiation | FunnelStage::Reserved => Some(LeadCategory::Hot),
            FunnelStage::Closed | FunnelStage::Delivered => Some(LeadCategory::Client),
            _ => None,
        }
    }

    /// Category for a stage: forced override first, then score thresholds.
    pub fn derive(stage: FunnelStage) -> Self {
        Self::forced_for_stage(stage).unwrap_or_else(|| Self::from_score(stage.base_score()))
    }
}

impl std::fmt::Display for LeadCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the customer wants the credit advisor to reach them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactModality {
    PhoneCall,
    WhatsApp,
    InPerson,
}

impl ContactModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactModality::PhoneCall => "llamada",
            ContactModality::WhatsApp => "whatsapp",
            ContactModality::InPerson => "presencial",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match crate::text::normalize(s).as_str() {
            "llamada" | "phone_call" => Some(ContactModality::PhoneCall),
            "whatsapp" => Some(ContactModality::WhatsApp),
            "presencial" | "in_person" => Some(ContactModality::InPerson),
            _ => None,
        }
    }

    /// Numbered-choice or keyword detection ("1"/"llamada", "2"/"whatsapp",
    /// "3"/"presencial").
    pub fn detect(text: &str) -> Option<Self> {
        let norm = crate::text::normalize(text);
        if norm.contains('1') || norm.contains("llamada") || norm.contains("telefon")
            || norm.contains("marcar")
        {
            return Some(ContactModality::PhoneCall);
        }
        if norm.contains('2') || norm.contains("whatsapp") || norm.contains("mensaje")
            || norm.contains("escrib")
        {
            return Some(ContactModality::WhatsApp);
        }
        if norm.contains('3') || norm.contains("presencial") || norm.contains("oficina")
            || norm.contains("persona")
        {
            return Some(ContactModality::InPerson);
        }
        None
    }

    /// Spanish phrase for confirmation messages.
    pub fn describe_es(&self) -> &'static str {
        match self {
            ContactModality::PhoneCall => "Te llamará en breve",
            ContactModality::WhatsApp => "Te escribirá por WhatsApp",
            ContactModality::InPerson => "Te esperamos en oficina para atenderte",
        }
    }
}

/// Action a staff member has been asked to confirm with a yes/no.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfirmableAction {
    /// Notify the lead that their appointment was cancelled.
    NotifyCancellation {
        lead_id: Uuid,
        lead_name: String,
        lead_phone: String,
        date: String,
        time: String,
    },
    /// Mark the lead fallen once the staff member confirms.
    MarkFallen { lead_id: Uuid, lead_name: String },
}

/// Typed replacement for the legacy free-form notes bag.
///
/// Exactly one pending interaction can be open per lead/staff record;
/// handlers consume it on the next inbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    #[default]
    None,
    /// Waiting for a yes/no on a specific action.
    AwaitingConfirmation { pending: ConfirmableAction },
    /// Waiting for a free-text reason after a lead was marked fallen.
    AwaitingCustomReason { lead_id: Uuid, lead_name: String },
    /// Waiting for document mentions during credit doc collection.
    AwaitingDocs { checklist: DocChecklist },
}

impl PendingAction {
    pub fn is_none(&self) -> bool {
        matches!(self, PendingAction::None)
    }
}

/// A prospective or current customer tracked through the funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Digits-only phone, matched by its last 10 digits.
    pub phone: String,
    pub name: Option<String>,
    pub status: FunnelStage,
    pub score: u8,
    pub category: LeadCategory,
    pub assigned_staff_id: Option<Uuid>,
    /// Credit sub-dialogue cursor. `Some` only while the dialogue is in
    /// progress; mutually exclusive with `survey_step > 0`.
    pub broker_stage: Option<crate::credit::BrokerStage>,
    /// Survey cursor: 0 = inactive, 1–6 delivered track, 10–15 fallen track.
    pub survey_step: u8,
    pub survey_completed: bool,
    pub pending_action: PendingAction,
    pub property_interest: Option<String>,
    pub needs_credit: bool,
    pub preferred_bank: Option<String>,
    pub monthly_income: Option<i64>,
    pub down_payment: Option<i64>,
    pub contact_modality: Option<ContactModality>,
    /// Set by the stalled-lead report cron, cleared on any funnel move.
    pub stalled_alert_sent: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// New lead from a first inbound message.
    pub fn new(phone: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        let status = FunnelStage::New;
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            name: None,
            status,
            score: status.base_score(),
            category: LeadCategory::derive(status),
            assigned_staff_id: None,
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
            source: source.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// First given name, or a neutral fallback for message templates.
    pub fn first_name(&self) -> &str {
        self.name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("amigo")
    }

    /// Whether the stored name is a real one rather than a placeholder.
    pub fn has_real_name(&self) -> bool {
        match self.name.as_deref() {
            None => false,
            Some(n) => {
                let norm = crate::text::normalize(n);
                !norm.is_empty()
                    && norm != "sin nombre"
                    && norm != "cliente"
                    && norm != "amigo"
                    && !norm.chars().any(|c| c.is_ascii_digit())
            }
        }
    }

    /// Apply a funnel move to the record fields: stage, table score,
    /// derived category, timestamp, stalled flag. Side effects beyond
    /// the record (notifications, surveys) belong to the funnel machine.
    pub fn apply_stage(&mut self, stage: FunnelStage) {
        self.status = stage;
        self.score = stage.base_score();
        self.category = LeadCategory::derive(stage);
        self.stalled_alert_sent = false;
        self.updated_at = Utc::now();
    }

    pub fn in_survey(&self) -> bool {
        self.survey_step > 0
    }

    pub fn in_credit_dialogue(&self) -> bool {
        self.broker_stage
            .map(|s| !matches!(s, crate::credit::BrokerStage::HandedOff))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_pure_table_lookup() {
        let mut lead = Lead::new("5214921112233", "organic");
        lead.score = 77; // prior score must not matter
        lead.apply_stage(FunnelStage::Contacted);
        assert_eq!(lead.score, 35);
        lead.apply_stage(FunnelStage::Fallen);
        assert_eq!(lead.score, 0);
        lead.apply_stage(FunnelStage::Closed);
        assert_eq!(lead.score, 100);
    }

    #[test]
    fn category_overrides_for_late_stages() {
        assert_eq!(LeadCategory::derive(FunnelStage::Negotiation), LeadCategory::Hot);
        assert_eq!(LeadCategory::derive(FunnelStage::Reserved), LeadCategory::Hot);
        assert_eq!(LeadCategory::derive(FunnelStage::Closed), LeadCategory::Client);
        assert_eq!(LeadCategory::derive(FunnelStage::Delivered), LeadCategory::Client);
    }

    #[test]
    fn category_thresholds_for_early_stages() {
        assert_eq!(LeadCategory::derive(FunnelStage::New), LeadCategory::Cold);
        assert_eq!(LeadCategory::derive(FunnelStage::Contacted), LeadCategory::Cold);
        assert_eq!(LeadCategory::derive(FunnelStage::Scheduled), LeadCategory::Warm);
        assert_eq!(LeadCategory::derive(FunnelStage::Visited), LeadCategory::Hot);
        assert_eq!(LeadCategory::derive(FunnelStage::Fallen), LeadCategory::Cold);
    }

    #[test]
    fn next_and_previous_clamp_at_ends() {
        assert_eq!(FunnelStage::New.previous(), None);
        assert_eq!(FunnelStage::New.next(), Some(FunnelStage::Contacted));
        assert_eq!(FunnelStage::Delivered.next(), None);
        assert_eq!(FunnelStage::Closed.next(), Some(FunnelStage::Delivered));
        assert_eq!(FunnelStage::Fallen.next(), None);
        assert_eq!(FunnelStage::Fallen.previous(), None);
    }

    #[test]
    fn stage_aliases_resolve() {
        assert_eq!(FunnelStage::from_str("negociación"), Some(FunnelStage::Negotiation));
        assert_eq!(FunnelStage::from_str("NEGOCIACION"), Some(FunnelStage::Negotiation));
        assert_eq!(FunnelStage::from_str("apartado"), Some(FunnelStage::Reserved));
        assert_eq!(FunnelStage::from_str("entregado"), Some(FunnelStage::Delivered));
        assert_eq!(FunnelStage::from_str("visitó"), Some(FunnelStage::Visited));
        assert_eq!(FunnelStage::from_str("quién sabe"), None);
    }

    #[test]
    fn modality_detection() {
        assert_eq!(ContactModality::detect("1"), Some(ContactModality::PhoneCall));
        assert_eq!(ContactModality::detect("por whatsapp porfa"), Some(ContactModality::WhatsApp));
        assert_eq!(ContactModality::detect("en la oficina"), Some(ContactModality::InPerson));
        assert_eq!(ContactModality::detect("mmm"), None);
    }

    #[test]
    fn placeholder_names_are_not_real() {
        let mut lead = Lead::new("5214921112233", "organic");
        assert!(!lead.has_real_name());
        lead.name = Some("Sin nombre".into());
        assert!(!lead.has_real_name());
        lead.name = Some("María López".into());
        assert!(lead.has_real_name());
    }
}
