//! Appointment booking
//!
//! Turns extracted slot data into appointment rows. Never writes with a
//! missing slot: the reply prompts for exactly the first missing field.
//! Calendar writes and every notification go through the outbox.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use sales_agent_config::{DomainConfig, UNDECIDED_PROPERTY};
use sales_agent_core::lead::FUNNEL_ORDER;
use sales_agent_core::phone::last_ten;
use sales_agent_core::dates::{format_date_es, parse_spanish_date, parse_spanish_time};
use sales_agent_core::text::normalize;
use sales_agent_core::{Appointment, AppointmentKind, AppointmentStatus, FunnelStage, Lead,
    StaffMember, StaffRole};
use sales_agent_llm::ExtractedData;
use sales_agent_persistence::{OutboxTask, PersistenceLayer};
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::funnel::{FunnelEngine, Mover};
use crate::{credit, AgentError};

/// Re-checked immediately before insert; a second booking attempt inside
/// this window updates the existing row instead of creating another.
const DEDUP_WINDOW_MINUTES: i64 = 30;

/// Slot data gathered for one booking attempt.
#[derive(Debug, Clone, Default)]
pub struct VisitRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    /// Development as mentioned, canonicalized at booking time.
    pub property_hint: Option<String>,
}

impl VisitRequest {
    /// Merge classifier extraction, the lead record and the raw message
    /// into one request. Extraction wins; the raw text is the fallback
    /// for dates and times the model missed.
    pub fn from_conversation(
        extracted: &ExtractedData,
        lead: &Lead,
        message: &str,
        today: NaiveDate,
    ) -> Self {
        let name = extracted
            .name
            .clone()
            .or_else(|| lead.has_real_name().then(|| lead.name.clone()).flatten());
        let date = extracted
            .date
            .as_deref()
            .and_then(|raw| resolve_date(raw, today))
            .or_else(|| parse_spanish_date(message, today));
        let time = extracted
            .time
            .as_deref()
            .and_then(resolve_time)
            .or_else(|| parse_spanish_time(message));
        Self {
            name,
            phone: Some(lead.phone.clone()),
            date,
            time,
            property_hint: extracted.development.clone(),
        }
    }
}

/// Book a sales visit. Returns the lead-facing replies; staff and
/// calendar notifications are queued as side effects.
pub async fn book_visit(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    funnel: &FunnelEngine,
    lead: &mut Lead,
    request: &VisitRequest,
    mover: Mover<'_>,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    let Some(name) = request.name.clone() else {
        return Ok(vec![
            "¡Con gusto te agendo! 😊 ¿Me compartes tu *nombre completo* para la cita?"
                .to_string(),
        ]);
    };
    let Some(phone) = request.phone.clone() else {
        return Ok(vec![
            "📱 ¿A qué número de celular te podemos contactar?".to_string(),
        ]);
    };
    let (date, time) = match (request.date, request.time) {
        (Some(d), Some(t)) => (d, t),
        (Some(d), None) => {
            return Ok(vec![format!(
                "⏰ ¿A qué *hora* te gustaría tu visita del {}?",
                format_date_es(d),
            )]);
        }
        (None, Some(_)) => {
            return Ok(vec![
                "📅 ¿Qué *día* te gustaría venir a conocer el desarrollo?".to_string(),
            ]);
        }
        (None, None) => {
            return Ok(vec![
                "📅 ¿Qué *día y hora* te gustaría visitarnos? \
                 (por ejemplo: \"mañana a las 4pm\")"
                    .to_string(),
            ]);
        }
    };

    if date < today {
        return Ok(vec![
            "Esa fecha ya pasó 😅 ¿Qué día te gustaría venir?".to_string(),
        ]);
    }
    if !domain.business_hours.is_open(date.weekday(), time.hour()) {
        return Ok(vec![notify::outside_hours_pushback(
            lead.first_name(),
            time.hour(),
            date.weekday(),
            &domain.business_hours,
        )]);
    }

    let development = domain
        .find_development(request.property_hint.as_deref().unwrap_or(""))
        .or_else(|| {
            lead.property_interest
                .as_deref()
                .and_then(|p| domain.find_development(p))
        });
    let property = development
        .map(|d| d.name.clone())
        .or_else(|| lead.property_interest.clone())
        .unwrap_or_else(|| UNDECIDED_PROPERTY.to_string());

    // Fresh re-check right before the insert. Duplicate webhook
    // deliveries and double-taps land inside this window.
    let existing = stores.appointments.list_for_lead(&lead.phone).await?;
    let cutoff = Utc::now() - Duration::minutes(DEDUP_WINDOW_MINUTES);
    if let Some(recent) = existing
        .iter()
        .filter(|a| a.is_active() && a.created_at > cutoff)
        .max_by_key(|a| a.created_at)
    {
        let mut recent = recent.clone();
        if is_placeholder_name(&recent.lead_name) && !is_placeholder_name(&name) {
            recent.lead_name = name;
            stores.appointments.upsert(&recent).await?;
        }
        tracing::info!(phone = %lead.phone, "Duplicate booking attempt within dedup window");
        let seller = staff_for(stores, recent.staff_id).await?;
        return Ok(vec![notify::appointment_confirmation_for_lead(
            lead,
            &recent,
            development,
            seller.as_ref(),
        )]);
    }
    let first_booking = existing.is_empty();

    let seller = resolve_seller(stores, lead, today).await?;
    let mut appt = Appointment::new(
        lead.id,
        name.as_str(),
        phone.as_str(),
        property.as_str(),
        date,
        time,
        AppointmentKind::SalesVisit,
    );
    if let Some(seller) = &seller {
        appt.staff_id = Some(seller.id);
        if lead.assigned_staff_id.is_none() {
            lead.assigned_staff_id = Some(seller.id);
        }
    }
    stores.appointments.upsert(&appt).await?;
    tracing::info!(
        phone = %lead.phone,
        property = %property,
        date = %date,
        "Appointment booked"
    );
    metrics::counter!("sales_agent_appointments_total", "kind" => "sales_visit").increment(1);

    queue_calendar_event(stores, lead, &appt, development.and_then(|d| d.maps_url.clone())).await;
    if let Some(seller) = &seller {
        enqueue_send(
            &stores.outbox,
            &seller.phone,
            &notify::new_appointment_for_seller(&appt, lead, development),
        )
        .await;
    }

    if lead.needs_credit {
        book_credit_advisory(stores, lead, &appt, seller.as_ref(), today).await?;
    }

    let stage_rank = |s: FunnelStage| FUNNEL_ORDER.iter().position(|x| *x == s).unwrap_or(0);
    if stage_rank(lead.status) < stage_rank(FunnelStage::Scheduled) {
        funnel.move_to(lead, FunnelStage::Scheduled, mover).await?;
    }
    stores.leads.upsert(lead).await?;

    let mut replies = Vec::new();
    if first_booking {
        replies.push(notify::welcome_for_lead(lead, development, &domain.company));
    }
    replies.push(notify::appointment_confirmation_for_lead(
        lead,
        &appt,
        development,
        seller.as_ref(),
    ));
    Ok(replies)
}

/// Cancel every active appointment of a lead. Calendar events queue for
/// deletion; the caller decides who gets told.
pub async fn cancel_active(
    stores: &PersistenceLayer,
    lead: &Lead,
) -> Result<Vec<Appointment>, AgentError> {
    let mut cancelled = Vec::new();
    for appt in stores.appointments.list_for_lead(&lead.phone).await? {
        if !appt.is_active() {
            continue;
        }
        stores
            .appointments
            .update_status(&appt.lead_phone, appt.id, AppointmentStatus::Cancelled)
            .await?;
        if let Some(event_id) = &appt.calendar_event_id {
            if let Err(e) = stores
                .outbox
                .enqueue(&OutboxTask::calendar_delete(event_id))
                .await
            {
                tracing::warn!(error = %e, "Failed to queue calendar deletion");
            }
        }
        cancelled.push(appt);
    }
    Ok(cancelled)
}

/// Mirror booking for leads in the credit flow: the advisor gets a visit
/// at the same slot to pitch financing on site.
async fn book_credit_advisory(
    stores: &PersistenceLayer,
    lead: &Lead,
    visit: &Appointment,
    seller: Option<&StaffMember>,
    today: NaiveDate,
) -> Result<(), AgentError> {
    let bank = lead.preferred_bank.as_deref().unwrap_or("");
    let Some(advisor) = credit::resolve_advisor(stores, bank, today).await? else {
        tracing::warn!(phone = %lead.phone, "No advisor available for credit advisory");
        return Ok(());
    };

    let mut advisory = Appointment::new(
        lead.id,
        visit.lead_name.as_str(),
        visit.lead_phone.as_str(),
        visit.property.as_str(),
        visit.date,
        visit.time,
        AppointmentKind::CreditAdvisory,
    );
    advisory.staff_id = Some(advisor.id);
    stores.appointments.upsert(&advisory).await?;
    metrics::counter!("sales_agent_appointments_total", "kind" => "credit_advisory")
        .increment(1);

    enqueue_send(
        &stores.outbox,
        &advisor.phone,
        &notify::credit_visit_for_advisor(&advisory, lead, seller.map(|s| s.name.as_str())),
    )
    .await;
    Ok(())
}

/// Best-effort calendar write; the row stands even when this never runs.
async fn queue_calendar_event(
    stores: &PersistenceLayer,
    lead: &Lead,
    appt: &Appointment,
    maps_url: Option<String>,
) {
    let summary = format!("Visita {} - {}", appt.property, appt.lead_name);
    let description = format!(
        "Cliente: {}\nTel: {}\nOrigen: {}",
        appt.lead_name,
        last_ten(&appt.lead_phone),
        lead.source,
    );
    let location = maps_url.unwrap_or_else(|| appt.property.clone());
    let task = OutboxTask::calendar_create(
        &appt.lead_phone,
        appt.id,
        &summary,
        &description,
        &location,
        &appt.date.format("%Y-%m-%d").to_string(),
        &appt.time.format("%H:%M").to_string(),
    );
    if let Err(e) = stores.outbox.enqueue(&task).await {
        tracing::warn!(error = %e, "Failed to queue calendar event");
    }
}

/// The lead's own seller, else the first active one by name.
pub(crate) async fn resolve_seller(
    stores: &PersistenceLayer,
    lead: &Lead,
    today: NaiveDate,
) -> Result<Option<StaffMember>, AgentError> {
    if let Some(id) = lead.assigned_staff_id {
        if let Some(member) = stores.team.get(id).await? {
            return Ok(Some(member));
        }
    }
    let mut sellers: Vec<StaffMember> = stores
        .team
        .list_all()
        .await?
        .into_iter()
        .filter(|m| m.role() == StaffRole::Seller && m.available(today))
        .collect();
    sellers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sellers.into_iter().next())
}

async fn staff_for(
    stores: &PersistenceLayer,
    id: Option<uuid::Uuid>,
) -> Result<Option<StaffMember>, AgentError> {
    match id {
        Some(id) => Ok(stores.team.get(id).await?),
        None => Ok(None),
    }
}

fn resolve_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_spanish_date(raw, today))
}

fn resolve_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .ok()
        .or_else(|| NaiveTime::parse_from_str(raw, "%H:%M:%S").ok())
        .or_else(|| parse_spanish_time(raw))
}

pub(crate) fn is_placeholder_name(name: &str) -> bool {
    let norm = normalize(name);
    norm.is_empty()
        || norm == "sin nombre"
        || norm == "cliente"
        || norm == "amigo"
        || norm.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_agent_persistence::{init_in_memory, TaskKind};

    fn domain() -> DomainConfig {
        DomainConfig::default()
    }

    // 2025-03-10 is a Monday; the 14th a Friday, the 16th a Sunday.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn friday_request(name: Option<&str>) -> VisitRequest {
        VisitRequest {
            name: name.map(|n| n.to_string()),
            phone: Some("4929110022".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 3, 14),
            time: NaiveTime::from_hms_opt(16, 0, 0),
            property_hint: Some("monte verde".to_string()),
        }
    }

    fn fixture_lead() -> Lead {
        let mut lead = Lead::new("4929110022", "whatsapp");
        lead.name = Some("Ana López".to_string());
        lead
    }

    fn seller() -> StaffMember {
        StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor")
    }

    async fn setup() -> (PersistenceLayer, FunnelEngine) {
        let stores = init_in_memory();
        let funnel = FunnelEngine::new(stores.clone());
        (stores, funnel)
    }

    #[tokio::test]
    async fn missing_name_prompts_for_it() {
        let (stores, funnel) = setup().await;
        let mut lead = Lead::new("4929110022", "whatsapp");

        let replies = book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &friday_request(None),
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();
        assert!(replies[0].contains("nombre completo"));
        assert!(stores
            .appointments
            .list_for_lead("4929110022")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_time_prompts_for_it() {
        let (stores, funnel) = setup().await;
        let mut lead = fixture_lead();
        let mut request = friday_request(Some("Ana López"));
        request.time = None;

        let replies = book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &request,
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();
        assert!(replies[0].contains("hora"));
        assert!(replies[0].contains("viernes 14 de marzo"));
    }

    #[tokio::test]
    async fn sunday_booking_is_refused() {
        let (stores, funnel) = setup().await;
        let mut lead = fixture_lead();
        let mut request = friday_request(Some("Ana López"));
        request.date = NaiveDate::from_ymd_opt(2025, 3, 16);

        let replies = book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &request,
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();
        assert!(replies[0].contains("domingos"));
        assert!(stores
            .appointments
            .list_for_lead("4929110022")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn full_booking_writes_row_calendar_and_seller_notice() {
        let (stores, funnel) = setup().await;
        let seller = seller();
        stores.team.upsert(&seller).await.unwrap();
        let mut lead = fixture_lead();

        let replies = book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &friday_request(Some("Ana López")),
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();

        let appts = stores.appointments.list_for_lead("4929110022").await.unwrap();
        assert_eq!(appts.len(), 1);
        assert_eq!(appts[0].property, "Monte Verde");
        assert_eq!(appts[0].staff_id, Some(seller.id));
        assert_eq!(lead.assigned_staff_id, Some(seller.id));
        assert_eq!(lead.status, FunnelStage::Scheduled);

        // Welcome plus confirmation on a first booking.
        assert_eq!(replies.len(), 2);
        assert!(replies[0].contains("qué gusto"));
        assert!(replies[1].contains("viernes 14 de marzo"));
        assert!(replies[1].contains("4:00 PM"));

        let tasks = stores
            .outbox
            .due(Utc::now() + Duration::days(30), 100)
            .await
            .unwrap();
        assert!(tasks.iter().any(|t| t.kind == TaskKind::CalendarCreate));
        assert!(tasks.iter().any(|t| {
            t.kind == TaskKind::SendMessage
                && t.payload["to"] == seller.phone.as_str()
                && t.payload["body"].as_str().unwrap().contains("NUEVA CITA")
        }));
    }

    #[tokio::test]
    async fn repeat_booking_inside_window_is_deduped() {
        let (stores, funnel) = setup().await;
        stores.team.upsert(&seller()).await.unwrap();
        let mut lead = fixture_lead();
        let request = friday_request(Some("Ana López"));

        book_visit(&stores, &domain(), &funnel, &mut lead, &request, Mover::Customer, today())
            .await
            .unwrap();
        book_visit(&stores, &domain(), &funnel, &mut lead, &request, Mover::Customer, today())
            .await
            .unwrap();

        let appts = stores.appointments.list_for_lead("4929110022").await.unwrap();
        assert_eq!(appts.len(), 1);
    }

    #[tokio::test]
    async fn dedup_fills_in_a_missing_name() {
        let (stores, funnel) = setup().await;
        let mut lead = fixture_lead();

        let mut anonymous = friday_request(Some("Cliente"));
        anonymous.property_hint = None;
        book_visit(&stores, &domain(), &funnel, &mut lead, &anonymous, Mover::Customer, today())
            .await
            .unwrap();

        book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &friday_request(Some("Ana López")),
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();

        let appts = stores.appointments.list_for_lead("4929110022").await.unwrap();
        assert_eq!(appts.len(), 1);
        assert_eq!(appts[0].lead_name, "Ana López");
    }

    #[tokio::test]
    async fn welcome_skipped_after_the_first_appointment() {
        let (stores, funnel) = setup().await;
        let mut lead = fixture_lead();

        // Older appointment outside the dedup window.
        let mut old = Appointment::new(
            lead.id,
            "Ana López",
            "4929110022",
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        old.status = AppointmentStatus::Completed;
        old.created_at = Utc::now() - Duration::hours(5);
        stores.appointments.upsert(&old).await.unwrap();

        let replies = book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &friday_request(Some("Ana López")),
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].contains("qué gusto"));
    }

    #[tokio::test]
    async fn credit_lead_gets_a_parallel_advisory() {
        let (stores, funnel) = setup().await;
        stores.team.upsert(&seller()).await.unwrap();
        let mut advisor = StaffMember::new("Laura Díaz", "5214921110009", "Asesor hipotecario");
        advisor.banks = vec!["BBVA".to_string()];
        stores.team.upsert(&advisor).await.unwrap();

        let mut lead = fixture_lead();
        lead.needs_credit = true;
        lead.preferred_bank = Some("BBVA".to_string());

        book_visit(
            &stores,
            &domain(),
            &funnel,
            &mut lead,
            &friday_request(Some("Ana López")),
            Mover::Customer,
            today(),
        )
        .await
        .unwrap();

        let appts = stores.appointments.list_for_lead("4929110022").await.unwrap();
        assert_eq!(appts.len(), 2);
        let advisory = appts
            .iter()
            .find(|a| a.kind == AppointmentKind::CreditAdvisory)
            .unwrap();
        assert_eq!(advisory.staff_id, Some(advisor.id));

        let tasks = stores
            .outbox
            .due(Utc::now() + Duration::days(30), 100)
            .await
            .unwrap();
        assert!(tasks.iter().any(|t| {
            t.kind == TaskKind::SendMessage
                && t.payload["to"] == advisor.phone.as_str()
                && t.payload["body"]
                    .as_str()
                    .unwrap()
                    .contains("LEAD NECESITA CRÉDITO")
        }));
    }

    #[tokio::test]
    async fn cancel_active_queues_calendar_deletion() {
        let (stores, _) = setup().await;
        let lead = fixture_lead();
        let mut appt = Appointment::new(
            lead.id,
            "Ana López",
            "4929110022",
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        appt.calendar_event_id = Some("EVT-1".to_string());
        stores.appointments.upsert(&appt).await.unwrap();

        let cancelled = cancel_active(&stores, &lead).await.unwrap();
        assert_eq!(cancelled.len(), 1);

        let stored = stores
            .appointments
            .get("4929110022", appt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);

        let tasks = stores.outbox.due(Utc::now(), 100).await.unwrap();
        assert!(tasks
            .iter()
            .any(|t| t.kind == TaskKind::CalendarDelete && t.payload["event_id"] == "EVT-1"));
    }

    #[test]
    fn request_gathers_fields_from_extraction_and_text() {
        let lead = fixture_lead();
        let extracted = ExtractedData {
            date: Some("2025-03-14".to_string()),
            time: Some("16:00".to_string()),
            development: Some("Los Encinos".to_string()),
            ..Default::default()
        };
        let request = VisitRequest::from_conversation(&extracted, &lead, "quiero ir", today());
        assert_eq!(request.name.as_deref(), Some("Ana López"));
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(request.time, NaiveTime::from_hms_opt(16, 0, 0));

        // Extraction empty: the raw text carries the slot data.
        let request = VisitRequest::from_conversation(
            &ExtractedData::default(),
            &lead,
            "nos vemos el viernes a las 4pm",
            today(),
        );
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(request.time, NaiveTime::from_hms_opt(16, 0, 0));
    }
}
