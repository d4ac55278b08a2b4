//! Exit surveys for delivered and fallen leads
//!
//! Two tracks share the same slot sequence: gate, birthday, email or
//! exit reason, rating, feedback, referral. The delivered track runs on
//! steps 1-6, the fallen track on 10-15. Answers are recorded as system
//! turns in the conversation history; the lead only carries the cursor
//! and the completed flag.

use sales_agent_config::DomainConfig;
use sales_agent_core::phone::{digits_only, last_ten};
use sales_agent_core::text::{find_email, is_affirmative, is_negative, normalize, parse_rating};
use sales_agent_core::{ChatTurn, Lead, TurnRole};
use sales_agent_persistence::PersistenceLayer;
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::AgentError;

/// Which exit survey a lead is walking through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyTrack {
    Delivered,
    Fallen,
}

impl SurveyTrack {
    /// Step value of the yes/no gate that opens the track.
    pub fn gate_step(&self) -> u8 {
        match self {
            SurveyTrack::Delivered => 1,
            SurveyTrack::Fallen => 10,
        }
    }

    /// Track for a stored cursor value, `None` when no survey is open.
    pub fn from_step(step: u8) -> Option<Self> {
        match step {
            1..=6 => Some(SurveyTrack::Delivered),
            10..=15 => Some(SurveyTrack::Fallen),
            _ => None,
        }
    }
}

/// Opening question sent when the funnel enters a terminal stage.
pub fn gate_question(track: SurveyTrack, lead: &Lead) -> String {
    let first = lead.first_name();
    match track {
        SurveyTrack::Delivered => format!(
            "🎉 ¡Felicidades por tu nueva casa, {first}! Nos encantaría conocer tu \
             experiencia con una breve encuesta de 5 preguntas. ¿Tienes un momento?"
        ),
        SurveyTrack::Fallen => format!(
            "Hola {first} 🙏 Lamentamos que no siguieras con nosotros. ¿Nos ayudas \
             con una breve encuesta para mejorar? Son solo 5 preguntas."
        ),
    }
}

/// One survey turn: validate the answer for the current step, record it,
/// advance the cursor. Invalid answers re-prompt without advancing.
pub async fn handle(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    lead: &mut Lead,
    text: &str,
) -> Result<Vec<String>, AgentError> {
    let Some(track) = SurveyTrack::from_step(lead.survey_step) else {
        return Ok(Vec::new());
    };
    let slot = lead.survey_step - track.gate_step();

    let replies = match slot {
        0 => {
            if is_affirmative(text) {
                lead.survey_step += 1;
                vec![question_for(track, 1)]
            } else {
                vec![
                    "Sin presión 😊 Cuando tengas un momento, responde *sí* y \
                     comenzamos con la encuesta."
                        .to_string(),
                ]
            }
        }
        1 => {
            if looks_like_date(text) {
                record_answer(stores, lead, &format!("Cumpleaños: {}", text.trim())).await;
                lead.survey_step += 1;
                vec![question_for(track, 2)]
            } else {
                vec!["No logré leer la fecha 😅 ¿Me la repites? (ejemplo: 15 de mayo)".to_string()]
            }
        }
        2 => match track {
            SurveyTrack::Delivered => {
                if let Some(email) = find_email(text) {
                    record_answer(stores, lead, &format!("Correo: {email}")).await;
                    lead.survey_step += 1;
                    vec![question_for(track, 3)]
                } else {
                    vec!["No parece un correo válido 😅 ¿Me lo repites?".to_string()]
                }
            }
            SurveyTrack::Fallen => {
                record_answer(stores, lead, &format!("Motivo de salida: {}", text.trim())).await;
                lead.survey_step += 1;
                vec![question_for(track, 3)]
            }
        },
        3 => {
            if let Some(rating) = parse_rating(text) {
                record_answer(stores, lead, &format!("Calificación: {rating}/10")).await;
                lead.survey_step += 1;
                vec![question_for(track, 4)]
            } else {
                vec!["Con un número del *1 al 10* porfa 😊".to_string()]
            }
        }
        4 => {
            record_answer(stores, lead, &format!("Comentarios: {}", text.trim())).await;
            lead.survey_step += 1;
            vec![question_for(track, 5)]
        }
        _ => {
            let mut replies = Vec::new();
            if !is_negative(text) {
                if let Some((name, phone)) = parse_referral(text) {
                    register_referral(stores, domain, lead, &name, &phone, &mut replies).await?;
                }
            }
            lead.survey_completed = true;
            lead.survey_step = 0;
            replies.push(closing_message(track, lead));
            replies
        }
    };

    Ok(replies)
}

fn question_for(track: SurveyTrack, slot: u8) -> String {
    match (slot, track) {
        (1, _) => "🎂 ¿Cuál es tu fecha de nacimiento? (ejemplo: 15 de mayo)".to_string(),
        (2, SurveyTrack::Delivered) => "📧 ¿Cuál es tu correo electrónico?".to_string(),
        (2, SurveyTrack::Fallen) => {
            "💬 ¿Cuál fue el motivo principal por el que no continuaste con nosotros?".to_string()
        }
        (3, _) => "⭐ Del 1 al 10, ¿cómo calificarías tu experiencia con nosotros?".to_string(),
        (4, SurveyTrack::Delivered) => {
            "📝 ¿Algún comentario sobre tu experiencia? Nos ayuda mucho.".to_string()
        }
        (4, SurveyTrack::Fallen) => {
            "📝 ¿Qué podríamos mejorar? Cualquier comentario nos ayuda.".to_string()
        }
        _ => "🤝 ¿Conoces a alguien que busque casa? Compárteme su *nombre y teléfono* \
              y con gusto lo atendemos. (o responde *no*)"
            .to_string(),
    }
}

fn closing_message(track: SurveyTrack, lead: &Lead) -> String {
    let first = lead.first_name();
    match track {
        SurveyTrack::Delivered => {
            format!("🙏 ¡Mil gracias por tus respuestas, {first}! Disfruta tu nueva casa 🏠✨")
        }
        SurveyTrack::Fallen => format!(
            "🙏 Gracias por tu tiempo y tus respuestas, {first}. \
             Las puertas siempre están abiertas para ti 🏠"
        ),
    }
}

async fn record_answer(stores: &PersistenceLayer, lead: &Lead, note: &str) {
    let turn = ChatTurn::new(TurnRole::System, note);
    if let Err(e) = stores.history.append(&lead.phone, &turn).await {
        tracing::warn!(phone = %lead.phone, error = %e, "Could not record survey answer");
    }
}

/// A date-ish answer: any digit or a month name.
fn looks_like_date(text: &str) -> bool {
    const MONTHS: [&str; 12] = [
        "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto", "septiembre",
        "octubre", "noviembre", "diciembre",
    ];
    let norm = normalize(text);
    norm.chars().any(|c| c.is_ascii_digit()) || MONTHS.iter().any(|m| norm.contains(m))
}

/// "NAME PHONE" with at least ten digits and at least one name word.
fn parse_referral(text: &str) -> Option<(String, String)> {
    let digits = digits_only(text);
    if digits.len() < 10 {
        return None;
    }
    let name: String = text
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_alphabetic()))
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        return None;
    }
    Some((name, last_ten(&digits)))
}

async fn register_referral(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    lead: &Lead,
    name: &str,
    phone: &str,
    replies: &mut Vec<String>,
) -> Result<(), AgentError> {
    if phone == last_ten(&lead.phone) {
        return Ok(());
    }
    if stores.leads.get(phone).await?.is_some() {
        replies.push("¡Gracias! A esa persona ya la estamos atendiendo 😊".to_string());
        return Ok(());
    }

    let mut referred = Lead::new(phone, "referral");
    referred.name = Some(name.to_string());
    referred.assigned_staff_id = lead.assigned_staff_id;
    stores.leads.upsert(&referred).await?;
    tracing::info!(phone, referrer = %lead.phone, "Referred lead created");

    if let Some(owner_id) = lead.assigned_staff_id {
        if let Some(owner) = stores.team.get(owner_id).await? {
            enqueue_send(
                &stores.outbox,
                &owner.phone,
                &notify::referral_for_staff(name, phone, lead.first_name()),
            )
            .await;
        }
    }

    let first = name.split_whitespace().next().unwrap_or(name);
    enqueue_send(
        &stores.outbox,
        phone,
        &format!(
            "¡Hola {first}! 👋 {} nos compartió tu contacto porque cree que te puede \
             interesar una casa propia. Soy {}, de {} 🏠 ¿Te gustaría conocer \
             nuestros desarrollos?",
            lead.first_name(),
            domain.company.agent_name,
            domain.company.name,
        ),
    )
    .await;

    replies.push(format!("¡Gracias por recomendarnos! Ya le escribimos a {first} 🤝"));
    Ok(())
}
