//! Customer conversation flow
//!
//! One inbound message in, zero or more queued replies out. Routing
//! order: active survey, active credit dialogue, then the classifier.
//! The classifier's reply is used as-is for informational intents;
//! structured intents (booking, cancellation, credit) answer from their
//! own flow so slot prompts stay deterministic.

use chrono::NaiveDate;

use sales_agent_config::{DevelopmentConfig, DomainConfig};
use sales_agent_core::conversation::HISTORY_LIMIT;
use sales_agent_core::dates::{format_date_es, local_today};
use sales_agent_core::text::{extract_name, format_money, normalize};
use sales_agent_core::{ChatTurn, ContactModality, FunnelStage, IncomingMessage, Lead};
use sales_agent_llm::{ClassifierOutcome, Intent, IntentClassifier};
use sales_agent_persistence::PersistenceLayer;
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::funnel::{FunnelEngine, Mover};
use crate::scheduler::VisitRequest;
use crate::{credit, scheduler, survey, AgentError};

/// Handle one customer message end to end: route, act, persist, queue
/// the replies and record both sides in the history.
pub async fn handle(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    classifier: &IntentClassifier,
    funnel: &FunnelEngine,
    msg: &IncomingMessage,
    utc_offset_hours: i32,
) -> Result<(), AgentError> {
    let phone = msg.phone_digits();
    let today = local_today(utc_offset_hours);

    let mut lead = match stores.leads.get(&phone).await? {
        Some(lead) => lead,
        None => {
            let mut lead = Lead::new(phone.as_str(), "whatsapp");
            if let Some(profile) = msg.profile_name.as_deref() {
                if !profile.trim().is_empty() {
                    lead.name = Some(profile.trim().to_string());
                }
            }
            tracing::info!(phone = %phone, "New lead from first contact");
            metrics::counter!("sales_agent_leads_created_total").increment(1);
            lead
        }
    };

    // An inbound message supersedes any scheduled nudge.
    match stores.outbox.cancel_follow_ups(&lead.phone).await {
        Ok(n) if n > 0 => tracing::debug!(phone = %lead.phone, cancelled = n, "Follow-ups cancelled"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to cancel follow-ups"),
    }

    let mut replies = if lead.in_survey() {
        survey::handle(stores, domain, &mut lead, &msg.body).await?
    } else if lead.in_credit_dialogue() {
        credit::handle(stores, domain, &mut lead, &msg.body, today).await?
    } else {
        classify_and_act(stores, domain, classifier, funnel, &mut lead, msg, today).await?
    };

    if replies.is_empty() {
        replies.push(format!(
            "Hola {}, estoy aquí para ayudarte. ¿En qué puedo asistirte?",
            lead.first_name(),
        ));
    }

    stores.leads.upsert(&lead).await?;

    if let Err(e) = stores.history.append(&lead.phone, &ChatTurn::user(&msg.body)).await {
        tracing::warn!(error = %e, "Failed to record user turn");
    }
    for reply in &replies {
        enqueue_send(&stores.outbox, &lead.phone, reply).await;
        if let Err(e) = stores.history.append(&lead.phone, &ChatTurn::assistant(reply)).await {
            tracing::warn!(error = %e, "Failed to record assistant turn");
        }
    }
    Ok(())
}

async fn classify_and_act(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    classifier: &IntentClassifier,
    funnel: &FunnelEngine,
    lead: &mut Lead,
    msg: &IncomingMessage,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    // Mid-survey and mid-credit answers never reach this path, so a
    // bare two-word message here is safe to read as a name.
    if let Some(capture) = extract_name(&msg.body) {
        if capture.explicit || !lead.has_real_name() {
            lead.name = Some(capture.name);
            backfill_appointment_names(stores, lead).await;
        }
    }

    let history = stores.history.recent(&lead.phone, HISTORY_LIMIT).await?;
    let outcome = classifier
        .classify(domain, lead, &history, &msg.body, today)
        .await;
    metrics::counter!("sales_agent_intents_total", "intent" => outcome.intent.as_str())
        .increment(1);
    tracing::debug!(
        phone = %lead.phone,
        intent = outcome.intent.as_str(),
        parse_error = outcome.parse_error,
        "Message classified"
    );

    merge_extracted(domain, lead, &outcome);

    let mut replies = match outcome.intent {
        Intent::AgendarCita | Intent::ConfirmarCita => {
            let request = VisitRequest::from_conversation(&outcome.extracted, lead, &msg.body, today);
            let booked =
                scheduler::book_visit(stores, domain, funnel, lead, &request, Mover::Customer, today)
                    .await?;
            if booked.is_empty() {
                model_reply(&outcome.response)
            } else {
                booked
            }
        }
        Intent::CancelarCita => cancel_appointments(stores, lead).await?,
        Intent::Credito => credit::start(lead),
        Intent::HablarHumano => request_human(stores, lead, today).await?,
        Intent::NoInteresado => {
            let mut replies = model_reply(&outcome.response);
            if replies.is_empty() {
                replies.push(format!(
                    "Entiendo, {} 😊 Gracias por tu tiempo. Si más adelante \
                     retomas la búsqueda, aquí estoy.",
                    lead.first_name(),
                ));
            }
            funnel.move_to(lead, FunnelStage::Fallen, Mover::Customer).await?;
            replies
        }
        _ => model_reply(&outcome.response),
    };

    // Handoff flag can ride along with any intent.
    if outcome.request_handoff && outcome.intent != Intent::HablarHumano {
        notify_handoff(stores, lead, today).await?;
    }
    if outcome.send_location {
        if let Some(text) = location_reply(domain, lead) {
            replies.push(text);
        }
    }
    if outcome.send_media {
        if let Some(text) = media_reply(domain, lead, &history, &msg.body) {
            replies.push(text);
        }
    }

    if lead.status == FunnelStage::New {
        funnel.move_to(lead, FunnelStage::Contacted, Mover::Customer).await?;
    }
    Ok(replies)
}

fn model_reply(response: &str) -> Vec<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

/// Pull every extracted slot onto the lead record. Names follow the
/// same rule as the capture heuristic: placeholders only.
fn merge_extracted(domain: &DomainConfig, lead: &mut Lead, outcome: &ClassifierOutcome) {
    let extracted = &outcome.extracted;
    if let Some(name) = &extracted.name {
        if !name.trim().is_empty() && !lead.has_real_name() {
            lead.name = Some(name.trim().to_string());
        }
    }
    if let Some(raw) = &extracted.development {
        if let Some(dev) = domain.find_development(raw) {
            lead.property_interest = Some(dev.name.clone());
        }
    }
    if let Some(bank) = &extracted.bank {
        lead.preferred_bank = domain.detect_bank(bank).or_else(|| Some(bank.clone()));
    }
    if let Some(income) = extracted.monthly_income {
        lead.monthly_income = Some(income);
    }
    if let Some(down) = extracted.down_payment {
        lead.down_payment = Some(down);
    }
    if let Some(raw) = &extracted.modality {
        if let Some(modality) = ContactModality::detect(raw) {
            lead.contact_modality = Some(modality);
        }
    }
    if extracted.wants_advisor == Some(true) {
        lead.needs_credit = true;
    }
}

async fn cancel_appointments(
    stores: &PersistenceLayer,
    lead: &mut Lead,
) -> Result<Vec<String>, AgentError> {
    let cancelled = scheduler::cancel_active(stores, lead).await?;
    if cancelled.is_empty() {
        return Ok(vec![format!(
            "No veo ninguna cita activa a tu nombre, {} 🤔 ¿Quieres agendar una?",
            lead.first_name(),
        )]);
    }

    for appt in &cancelled {
        if let Some(staff_id) = appt.staff_id {
            if let Some(member) = stores.team.get(staff_id).await? {
                enqueue_send(
                    &stores.outbox,
                    &member.phone,
                    &notify::cancellation_for_seller(appt),
                )
                .await;
            }
        }
    }
    let when = cancelled
        .last()
        .map(|a| format_date_es(a.date))
        .unwrap_or_default();
    Ok(vec![format!(
        "✅ Listo {}, tu cita del {} quedó cancelada. Cuando quieras \
         reagendar, aquí estoy 😊",
        lead.first_name(),
        when,
    )])
}

async fn request_human(
    stores: &PersistenceLayer,
    lead: &mut Lead,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    let Some(seller) = scheduler::resolve_seller(stores, lead, today).await? else {
        return Ok(vec![
            "¡Claro! En cuanto un asesor esté disponible te contacta 📞".to_string(),
        ]);
    };
    if lead.assigned_staff_id.is_none() {
        lead.assigned_staff_id = Some(seller.id);
    }
    enqueue_send(
        &stores.outbox,
        &seller.phone,
        &notify::human_handoff_for_staff(lead),
    )
    .await;
    Ok(vec![format!(
        "¡Claro, {}! 😊 Ya le avisé a {} de nuestro equipo; te contacta en breve 📞",
        lead.first_name(),
        seller.first_name(),
    )])
}

async fn notify_handoff(
    stores: &PersistenceLayer,
    lead: &mut Lead,
    today: NaiveDate,
) -> Result<(), AgentError> {
    if let Some(seller) = scheduler::resolve_seller(stores, lead, today).await? {
        if lead.assigned_staff_id.is_none() {
            lead.assigned_staff_id = Some(seller.id);
        }
        enqueue_send(
            &stores.outbox,
            &seller.phone,
            &notify::human_handoff_for_staff(lead),
        )
        .await;
    }
    Ok(())
}

fn current_development<'a>(domain: &'a DomainConfig, lead: &Lead) -> Option<&'a DevelopmentConfig> {
    lead.property_interest
        .as_deref()
        .and_then(|p| domain.find_development(p))
}

fn location_reply(domain: &DomainConfig, lead: &Lead) -> Option<String> {
    let dev = current_development(domain, lead)?;
    let url = dev.maps_url.as_deref()?;
    Some(format!(
        "📍 *{}*\n{}\n\n¿Te gustaría agendar una visita? 😊",
        dev.name, url,
    ))
}

/// Development card, sent once per development unless the client asks
/// for material again in so many words.
fn media_reply(
    domain: &DomainConfig,
    lead: &Lead,
    history: &[ChatTurn],
    message: &str,
) -> Option<String> {
    let dev = current_development(domain, lead)?;
    let marker = format!("🏠 *{}*", dev.name);

    let already_sent = history.iter().any(|t| t.text.contains(&marker));
    let norm = normalize(message);
    let explicit_request = ["foto", "folleto", "video", "imagen", "manda", "informacion", "info"]
        .iter()
        .any(|w| norm.contains(w));
    if already_sent && !explicit_request {
        return None;
    }

    let mut card = format!("{marker}\n\n{}", dev.description);
    if !dev.models.is_empty() {
        card.push_str("\n\n💰 *Modelos:*");
        for model in &dev.models {
            card.push_str(&format!("\n• {}: {}", model.name, format_money(model.price)));
        }
    } else if let Some((low, high)) = dev.price_span() {
        card.push_str(&format!(
            "\n\n💰 Desde {} hasta {}",
            format_money(low),
            format_money(high),
        ));
    }
    if let Some(url) = &dev.brochure_url {
        card.push_str(&format!("\n\n📄 {url}"));
    }
    Some(card)
}

/// A freshly captured name also fixes appointment rows booked while the
/// lead was still anonymous.
async fn backfill_appointment_names(stores: &PersistenceLayer, lead: &Lead) {
    let Some(name) = lead.name.as_deref() else {
        return;
    };
    let appointments = match stores.appointments.list_for_lead(&lead.phone).await {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load appointments for name backfill");
            return;
        }
    };
    for mut appt in appointments {
        if appt.is_active() && scheduler::is_placeholder_name(&appt.lead_name) {
            appt.lead_name = name.to_string();
            if let Err(e) = stores.appointments.upsert(&appt).await {
                tracing::warn!(error = %e, "Failed to backfill appointment name");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, Utc};
    use sales_agent_core::credit::BrokerStage;
    use sales_agent_core::{Appointment, AppointmentKind, StaffMember};
    use sales_agent_persistence::{init_in_memory, TaskKind};

    const PHONE: &str = "4929110022";

    fn domain() -> DomainConfig {
        DomainConfig::default()
    }

    async fn run(stores: &PersistenceLayer, body: &str) {
        let funnel = FunnelEngine::new(stores.clone());
        let msg = IncomingMessage::new(format!("whatsapp:+521{PHONE}"), body);
        handle(stores, &domain(), &IntentClassifier::disabled(), &funnel, &msg, -6)
            .await
            .unwrap();
    }

    async fn sent_bodies(stores: &PersistenceLayer) -> Vec<(String, String)> {
        stores
            .outbox
            .due(Utc::now() + Duration::days(30), 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TaskKind::SendMessage)
            .map(|t| {
                (
                    t.payload["to"].as_str().unwrap().to_string(),
                    t.payload["body"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn first_message_creates_lead_and_replies() {
        let stores = init_in_memory();
        run(&stores, "hola").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.source, "whatsapp");
        // Contacted right after the first exchange.
        assert_eq!(lead.status, FunnelStage::Contacted);

        let sends = sent_bodies(&stores).await;
        assert!(sends
            .iter()
            .any(|(to, body)| to == PHONE && body.contains("estoy aquí para ayudarte")));

        let history = stores.history.recent(PHONE, 10).await.unwrap();
        assert!(history.len() >= 2);
    }

    #[tokio::test]
    async fn explicit_name_is_captured() {
        let stores = init_in_memory();
        run(&stores, "hola, me llamo Carlos Vega").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.name.as_deref(), Some("Carlos Vega"));
    }

    #[tokio::test]
    async fn booking_without_a_name_prompts_for_it() {
        let stores = init_in_memory();
        run(&stores, "quiero una cita").await;

        let sends = sent_bodies(&stores).await;
        assert!(sends
            .iter()
            .any(|(_, body)| body.contains("nombre completo")));
        assert!(stores
            .appointments
            .list_for_lead(PHONE)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn credit_keyword_opens_the_dialogue() {
        let stores = init_in_memory();
        run(&stores, "me interesa un crédito").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.broker_stage, Some(BrokerStage::AwaitingChoice));
        assert!(lead.needs_credit);

        let sends = sent_bodies(&stores).await;
        assert!(sends
            .iter()
            .any(|(_, body)| body.contains("simulación de crédito")));
    }

    #[tokio::test]
    async fn survey_turns_route_to_the_survey() {
        let stores = init_in_memory();
        let mut lead = Lead::new(PHONE, "whatsapp");
        lead.name = Some("Ana López".to_string());
        lead.survey_step = 1;
        stores.leads.upsert(&lead).await.unwrap();

        run(&stores, "sí, claro").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.survey_step, 2);
    }

    #[tokio::test]
    async fn credit_turns_route_to_the_dialogue() {
        let stores = init_in_memory();
        let mut lead = Lead::new(PHONE, "whatsapp");
        lead.broker_stage = Some(BrokerStage::AwaitingIncome);
        stores.leads.upsert(&lead).await.unwrap();

        run(&stores, "gano 30 mil al mes").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.broker_stage, Some(BrokerStage::AwaitingDownPayment));
        assert_eq!(lead.monthly_income, Some(30_000));

        let sends = sent_bodies(&stores).await;
        assert!(sends.iter().any(|(_, body)| body.contains("$1,800,000")));
    }

    #[tokio::test]
    async fn not_interested_falls_and_opens_the_exit_survey() {
        let stores = init_in_memory();
        let mut lead = Lead::new(PHONE, "whatsapp");
        lead.name = Some("Ana López".to_string());
        lead.apply_stage(FunnelStage::Contacted);
        stores.leads.upsert(&lead).await.unwrap();

        run(&stores, "ya no me interesa, gracias").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.status, FunnelStage::Fallen);
        assert_eq!(lead.survey_step, 10);
    }

    #[tokio::test]
    async fn human_request_notifies_a_seller() {
        let stores = init_in_memory();
        let seller = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        stores.team.upsert(&seller).await.unwrap();

        run(&stores, "quiero hablar con una persona").await;

        let lead = stores.leads.get(PHONE).await.unwrap().unwrap();
        assert_eq!(lead.assigned_staff_id, Some(seller.id));

        let sends = sent_bodies(&stores).await;
        assert!(sends
            .iter()
            .any(|(to, body)| to == &seller.phone && body.contains("CLIENTE PIDE ATENCIÓN")));
        assert!(sends
            .iter()
            .any(|(to, body)| to == PHONE && body.contains("le avisé")));
    }

    #[tokio::test]
    async fn cancellation_cancels_and_tells_the_seller() {
        let stores = init_in_memory();
        let seller = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        stores.team.upsert(&seller).await.unwrap();

        let mut lead = Lead::new(PHONE, "whatsapp");
        lead.name = Some("Ana López".to_string());
        stores.leads.upsert(&lead).await.unwrap();

        let mut appt = Appointment::new(
            lead.id,
            "Ana López",
            PHONE,
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        appt.staff_id = Some(seller.id);
        stores.appointments.upsert(&appt).await.unwrap();

        run(&stores, "quiero cancelar mi cita").await;

        let stored = stores
            .appointments
            .get(PHONE, appt.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active());

        let sends = sent_bodies(&stores).await;
        assert!(sends
            .iter()
            .any(|(to, body)| to == &seller.phone && body.contains("CITA CANCELADA")));
        assert!(sends
            .iter()
            .any(|(to, body)| to == PHONE && body.contains("quedó cancelada")));
    }

    #[tokio::test]
    async fn name_capture_backfills_anonymous_appointments() {
        let stores = init_in_memory();
        let lead = Lead::new(PHONE, "whatsapp");
        stores.leads.upsert(&lead).await.unwrap();

        let appt = Appointment::new(
            lead.id,
            "Cliente",
            PHONE,
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        stores.appointments.upsert(&appt).await.unwrap();

        run(&stores, "soy Carlos Vega").await;

        let stored = stores
            .appointments
            .get(PHONE, appt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.lead_name, "Carlos Vega");
    }
}
