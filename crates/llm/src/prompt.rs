//! Prompt assembly for the WhatsApp classifier
//!
//! One classifier call gets one message list: a Spanish system prompt
//! carrying the agent persona, the property catalog and the JSON output
//! contract, then a recent slice of the conversation, then the incoming
//! message.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use sales_agent_config::DomainConfig;
use sales_agent_core::conversation::{recent_window, CLASSIFIER_WINDOW};
use sales_agent_core::dates::format_date_es;
use sales_agent_core::text::format_money;
use sales_agent_core::{ChatTurn, Lead, TurnRole};

use crate::classifier::Intent;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Build the message list for one classifier call.
///
/// History is capped to the last [`CLASSIFIER_WINDOW`] turns; internal
/// system notes in the history never reach the model.
pub fn build_classifier_messages(
    domain: &DomainConfig,
    lead: &Lead,
    history: &[ChatTurn],
    message: &str,
    today: NaiveDate,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(CLASSIFIER_WINDOW + 2);
    messages.push(ChatMessage::system(render_system_prompt(domain, lead, today)));

    for turn in recent_window(history, CLASSIFIER_WINDOW) {
        let role = match turn.role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
            TurnRole::System => continue,
        };
        messages.push(ChatMessage::new(role, turn.text.clone()));
    }

    messages.push(ChatMessage::user(message));
    messages
}

fn render_system_prompt(domain: &DomainConfig, lead: &Lead, today: NaiveDate) -> String {
    let company = &domain.company;
    let mut prompt = format!(
        r#"Eres {agent}, asesora de ventas de {name} por WhatsApp. Vendemos casas y terrenos en {city}, {state}. Hoy es {today_es} ({today_iso}).

ESTILO:
- Cálida y profesional; tutea al cliente.
- Sé breve (máximo 4 líneas), usa emojis 🏠 con moderación.
- Responde solo con información del catálogo; si no sabes algo, ofrece que un asesor lo confirme.
- Nunca inventes precios, promociones ni desarrollos.

CATÁLOGO:
{catalog}
ESTRATEGIA:
1. Si no conoces su nombre, preséntate y pregúntaselo.
2. Entiende qué busca y su presupuesto aproximado.
3. Recomienda máximo 3 modelos dentro de su presupuesto.
4. Si necesita crédito hipotecario, ofrece asesoría gratuita con nuestros asesores.
5. Cierra proponiendo agendar una visita al desarrollo.

CLIENTE:
{customer}

"#,
        agent = company.agent_name,
        name = company.name,
        city = company.city,
        state = company.state,
        today_es = format_date_es(today),
        today_iso = today,
        catalog = render_catalog(domain),
        customer = render_customer_block(lead),
    );

    prompt.push_str(OUTPUT_CONTRACT);
    prompt.push_str(&format!(
        "\n- \"intent\": una de: {}.\n",
        Intent::ALL
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    prompt.push_str(OUTPUT_FIELD_NOTES);
    prompt
}

// Raw block so the JSON braces stay literal.
const OUTPUT_CONTRACT: &str = r#"FORMATO DE SALIDA:
Responde únicamente con un objeto JSON, sin texto fuera del JSON:
{"intent": "...", "extracted_data": {"name": null, "development": null, "model": null, "date": null, "time": null, "bank": null, "monthly_income": null, "down_payment": null, "modality": null, "wants_advisor": null}, "response": "...", "send_media": false, "send_location": false, "request_handoff": false}
"#;

const OUTPUT_FIELD_NOTES: &str = r#"- "extracted_data": solo lo que el cliente dijo en este mensaje; lo demás queda en null.
- "response": tu mensaje para el cliente.
- "send_media": true si pide fotos, folleto o renders.
- "send_location": true si pide ubicación o cómo llegar.
- "request_handoff": true si insiste en hablar con una persona.
"#;

fn render_catalog(domain: &DomainConfig) -> String {
    let mut out = String::new();
    for dev in &domain.developments {
        out.push_str("• ");
        out.push_str(&dev.name);
        if !dev.description.is_empty() {
            out.push_str(" (");
            out.push_str(&dev.description);
            out.push(')');
        }
        if dev.models.is_empty() {
            if let Some((min, max)) = dev.price_span() {
                out.push_str(&format!(
                    ": de {} a {}",
                    format_money(min),
                    format_money(max)
                ));
            }
        } else {
            out.push_str(": ");
            let models: Vec<String> = dev
                .models
                .iter()
                .map(|m| format!("{} {}", m.name, format_money(m.price)))
                .collect();
            out.push_str(&models.join(", "));
        }
        out.push('\n');
    }
    out
}

fn render_customer_block(lead: &Lead) -> String {
    let mut lines = Vec::new();
    match (&lead.name, lead.has_real_name()) {
        (Some(name), true) => lines.push(format!("- Nombre: {name}")),
        _ => lines.push("- Aún no da su nombre; pídeselo con naturalidad.".to_string()),
    }
    if let Some(interest) = &lead.property_interest {
        lines.push(format!("- Interesado en: {interest}"));
    }
    lines.push(format!("- Etapa: {}", lead.status.label_es()));
    lines.join("\n")
}
