//! Intent classification over a completion backend
//!
//! One model call per incoming message returns a single JSON object
//! with the intent, the fields the client mentioned and the reply text.
//! Anything that is not usable JSON degrades: the raw reply goes out
//! verbatim and a keyword pass picks the intent. The classifier never
//! fails a conversation.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use sales_agent_config::DomainConfig;
use sales_agent_core::text::{normalize, parse_amount};
use sales_agent_core::{ChatTurn, Lead};

use crate::backend::CompletionBackend;
use crate::prompt::build_classifier_messages;

/// Closed set of intents the model may emit.
///
/// Wire labels are the snake_case Spanish strings the prompt enumerates;
/// anything else maps to [`Intent::Otro`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Saludo,
    InfoDesarrollo,
    ConsultaPrecio,
    Ubicacion,
    AgendarCita,
    ConfirmarCita,
    CancelarCita,
    Credito,
    DatosContacto,
    HablarHumano,
    NoInteresado,
    Despedida,
    Otro,
}

impl Intent {
    pub const ALL: [Intent; 13] = [
        Intent::Saludo,
        Intent::InfoDesarrollo,
        Intent::ConsultaPrecio,
        Intent::Ubicacion,
        Intent::AgendarCita,
        Intent::ConfirmarCita,
        Intent::CancelarCita,
        Intent::Credito,
        Intent::DatosContacto,
        Intent::HablarHumano,
        Intent::NoInteresado,
        Intent::Despedida,
        Intent::Otro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Saludo => "saludo",
            Intent::InfoDesarrollo => "info_desarrollo",
            Intent::ConsultaPrecio => "consulta_precio",
            Intent::Ubicacion => "ubicacion",
            Intent::AgendarCita => "agendar_cita",
            Intent::ConfirmarCita => "confirmar_cita",
            Intent::CancelarCita => "cancelar_cita",
            Intent::Credito => "credito",
            Intent::DatosContacto => "datos_contacto",
            Intent::HablarHumano => "hablar_humano",
            Intent::NoInteresado => "no_interesado",
            Intent::Despedida => "despedida",
            Intent::Otro => "otro",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        match normalize(value).replace(' ', "_").as_str() {
            "saludo" => Intent::Saludo,
            "info_desarrollo" => Intent::InfoDesarrollo,
            "consulta_precio" => Intent::ConsultaPrecio,
            "ubicacion" => Intent::Ubicacion,
            "agendar_cita" => Intent::AgendarCita,
            "confirmar_cita" => Intent::ConfirmarCita,
            "cancelar_cita" => Intent::CancelarCita,
            "credito" => Intent::Credito,
            "datos_contacto" => Intent::DatosContacto,
            "hablar_humano" => Intent::HablarHumano,
            "no_interesado" => Intent::NoInteresado,
            "despedida" => Intent::Despedida,
            _ => Intent::Otro,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields the model pulled out of the client's message.
///
/// Everything is optional; amounts tolerate strings like "25 mil".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedData {
    pub name: Option<String>,
    pub development: Option<String>,
    pub model: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub bank: Option<String>,
    pub monthly_income: Option<i64>,
    pub down_payment: Option<i64>,
    pub modality: Option<String>,
    pub wants_advisor: Option<bool>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(value_as_string);
        Self {
            name: field("name"),
            development: field("development"),
            model: field("model"),
            date: field("date"),
            time: field("time"),
            bank: field("bank"),
            monthly_income: value.get("monthly_income").and_then(value_as_amount),
            down_payment: value.get("down_payment").and_then(value_as_amount),
            modality: field("modality"),
            wants_advisor: value.get("wants_advisor").and_then(value_as_bool),
        }
    }
}

/// Result of classifying one incoming message
#[derive(Debug, Clone)]
pub struct ClassifierOutcome {
    pub intent: Intent,
    pub extracted: ExtractedData,
    /// Reply for the client; empty means the caller picks a fallback.
    pub response: String,
    pub send_media: bool,
    pub send_location: bool,
    pub request_handoff: bool,
    /// The model reply was not usable JSON and went out verbatim.
    pub parse_error: bool,
}

impl ClassifierOutcome {
    /// Outcome when there is no model reply at all: empty response and a
    /// keyword intent over the client's message.
    pub fn heuristic(message: &str) -> Self {
        Self {
            intent: heuristic_intent(message),
            extracted: ExtractedData::default(),
            response: String::new(),
            send_media: false,
            send_location: false,
            request_handoff: false,
            parse_error: false,
        }
    }
}

/// Classifier over an optional completion backend.
///
/// With no backend (model disabled or misconfigured) every message
/// still classifies via keywords.
pub struct IntentClassifier {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl IntentClassifier {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Classify one incoming message. Infallible: backend errors and
    /// unusable replies both degrade instead of propagating.
    pub async fn classify(
        &self,
        domain: &DomainConfig,
        lead: &Lead,
        history: &[ChatTurn],
        message: &str,
        today: NaiveDate,
    ) -> ClassifierOutcome {
        let Some(backend) = &self.backend else {
            return ClassifierOutcome::heuristic(message);
        };

        let messages = build_classifier_messages(domain, lead, history, message, today);
        match backend.complete(&messages).await {
            Ok(raw) => parse_reply(&raw, message),
            Err(e) => {
                tracing::warn!(error = %e, "classifier backend failed, degrading to keywords");
                ClassifierOutcome::heuristic(message)
            }
        }
    }
}

fn parse_reply(raw: &str, user_message: &str) -> ClassifierOutcome {
    let parsed = first_json_object(raw)
        .and_then(|span| serde_json::from_str::<Value>(span).ok());

    let Some(value) = parsed else {
        return ClassifierOutcome {
            intent: heuristic_intent(user_message),
            extracted: ExtractedData::default(),
            response: raw.trim().to_string(),
            send_media: false,
            send_location: false,
            request_handoff: false,
            parse_error: true,
        };
    };

    let extracted = value
        .get("extracted_data")
        .map(ExtractedData::from_value)
        .unwrap_or_default();

    let mut intent = value
        .get("intent")
        .and_then(Value::as_str)
        .map(Intent::from_wire)
        .unwrap_or_else(|| heuristic_intent(user_message));

    // A concrete date plus time means the client is locking in a visit,
    // whatever label the model chose. Cancellations keep their label.
    if extracted.date.is_some() && extracted.time.is_some() && intent != Intent::CancelarCita {
        intent = Intent::ConfirmarCita;
    }

    ClassifierOutcome {
        intent,
        extracted,
        response: value
            .get("response")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        send_media: flag(&value, "send_media"),
        send_location: flag(&value, "send_location"),
        request_handoff: flag(&value, "request_handoff"),
        parse_error: false,
    }
}

/// First balanced `{...}` span, honoring JSON string literals so braces
/// inside replies do not end the span early.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keyword fallback when no model reply is usable. Checks run most
/// specific first; "cancelar la cita" must not read as scheduling.
pub fn heuristic_intent(text: &str) -> Intent {
    let norm = normalize(text);
    if norm.is_empty() {
        return Intent::Otro;
    }
    if contains_any(&norm, &["no me interesa", "ya no me interesa", "no estoy interesado", "dejen de escribir"]) {
        return Intent::NoInteresado;
    }
    if contains_any(&norm, &["cancelar", "cancela", "ya no podre", "ya no voy a poder"]) {
        return Intent::CancelarCita;
    }
    if contains_any(&norm, &["credito", "hipotec", "infonavit", "fovissste", "financiamiento", "banco"]) {
        return Intent::Credito;
    }
    if contains_any(&norm, &["cita", "visita", "agendar", "recorrido", "conocer el desarrollo"]) {
        return Intent::AgendarCita;
    }
    if contains_any(&norm, &["precio", "cuanto cuesta", "cuanto sale", "costo", "presupuesto"]) {
        return Intent::ConsultaPrecio;
    }
    if contains_any(&norm, &["ubicacion", "donde esta", "donde queda", "direccion", "como llego", "maps"]) {
        return Intent::Ubicacion;
    }
    if contains_any(&norm, &["asesor", "humano", "una persona", "alguien real"]) {
        return Intent::HablarHumano;
    }
    if contains_any(&norm, &["informacion", "info", "modelos", "casas", "terrenos", "folleto", "fotos"]) {
        return Intent::InfoDesarrollo;
    }
    if contains_any(&norm, &["adios", "hasta luego", "nos vemos", "bye"]) {
        return Intent::Despedida;
    }
    if contains_any(&norm, &["hola", "buenos dias", "buenas tardes", "buenas noches", "buen dia", "que tal"]) {
        return Intent::Saludo;
    }
    Intent::Otro
}

fn contains_any(norm: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| norm.contains(n))
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_amount(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|a| *a > 0.0).map(|a| a.round() as i64),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(value_as_bool).unwrap_or(false)
}

fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match normalize(s).as_str() {
            "true" | "si" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ChatMessage;
    use crate::LlmError;
    use async_trait::async_trait;

    struct CannedBackend {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl CompletionBackend for CannedBackend {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.reply
                .clone()
                .map_err(|_| LlmError::Network("down".to_string()))
        }

        async fn is_available(&self) -> bool {
            self.reply.is_ok()
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn fixture_lead() -> Lead {
        Lead::new("5214929998877", "whatsapp")
    }

    fn fixture_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn well_formed_reply_parses() {
        let raw = r#"Claro, aquí va:
```json
{"intent": "info_desarrollo", "extracted_data": {"name": "Juan", "development": "MONTE VERDE"}, "response": "¡Hola Juan! 🏠 Te cuento de MONTE VERDE.", "send_media": true, "send_location": false, "request_handoff": false}
```"#;
        let outcome = parse_reply(raw, "cuéntame de monte verde");
        assert!(!outcome.parse_error);
        assert_eq!(outcome.intent, Intent::InfoDesarrollo);
        assert_eq!(outcome.extracted.name.as_deref(), Some("Juan"));
        assert_eq!(outcome.extracted.development.as_deref(), Some("MONTE VERDE"));
        assert!(outcome.send_media);
        assert!(outcome.response.starts_with("¡Hola Juan!"));
    }

    #[test]
    fn braces_inside_strings_do_not_cut_the_span() {
        let raw = r#"{"intent": "otro", "response": "usa {llaves} sin miedo"}"#;
        let outcome = parse_reply(raw, "ok");
        assert!(!outcome.parse_error);
        assert_eq!(outcome.response, "usa {llaves} sin miedo");
    }

    #[test]
    fn malformed_reply_goes_out_verbatim() {
        let raw = "¡Hola! ¿En qué te puedo ayudar hoy?";
        let outcome = parse_reply(raw, "hola buenas tardes");
        assert!(outcome.parse_error);
        assert_eq!(outcome.response, raw);
        assert_eq!(outcome.intent, Intent::Saludo);
        assert!(outcome.extracted.is_empty());
    }

    #[test]
    fn truncated_json_degrades() {
        let raw = r#"{"intent": "saludo", "response": "hola"#;
        let outcome = parse_reply(raw, "precio de las casas");
        assert!(outcome.parse_error);
        assert_eq!(outcome.intent, Intent::ConsultaPrecio);
    }

    #[test]
    fn date_and_time_force_confirmation() {
        let raw = r#"{"intent": "otro", "extracted_data": {"date": "viernes", "time": "4 pm"}, "response": "ok"}"#;
        let outcome = parse_reply(raw, "el viernes a las 4");
        assert_eq!(outcome.intent, Intent::ConfirmarCita);

        let raw = r#"{"intent": "cancelar_cita", "extracted_data": {"date": "viernes", "time": "4 pm"}, "response": "ok"}"#;
        let outcome = parse_reply(raw, "cancela mi cita del viernes a las 4");
        assert_eq!(outcome.intent, Intent::CancelarCita);
    }

    #[test]
    fn unknown_intent_label_maps_to_otro() {
        let raw = r#"{"intent": "chisme_local", "response": "ok"}"#;
        let outcome = parse_reply(raw, "mmm");
        assert_eq!(outcome.intent, Intent::Otro);
        assert_eq!(Intent::from_wire("CRÉDITO"), Intent::Credito);
        assert_eq!(Intent::from_wire("agendar cita"), Intent::AgendarCita);
    }

    #[test]
    fn extracted_amounts_tolerate_strings() {
        let raw = r#"{"intent": "credito", "extracted_data": {"monthly_income": "25 mil", "down_payment": 150000, "wants_advisor": "sí"}, "response": "ok"}"#;
        let outcome = parse_reply(raw, "gano 25 mil");
        assert_eq!(outcome.extracted.monthly_income, Some(25_000));
        assert_eq!(outcome.extracted.down_payment, Some(150_000));
        assert_eq!(outcome.extracted.wants_advisor, Some(true));
    }

    #[test]
    fn null_strings_are_dropped() {
        let raw = r#"{"intent": "saludo", "extracted_data": {"name": "null", "bank": "  "}, "response": "hola"}"#;
        let outcome = parse_reply(raw, "hola");
        assert!(outcome.extracted.is_empty());
    }

    #[test]
    fn heuristic_keywords() {
        assert_eq!(heuristic_intent("¿cuánto cuesta la casa?"), Intent::ConsultaPrecio);
        assert_eq!(heuristic_intent("quiero cancelar mi cita"), Intent::CancelarCita);
        assert_eq!(heuristic_intent("me interesa un crédito Infonavit"), Intent::Credito);
        assert_eq!(heuristic_intent("¿dónde está la oficina?"), Intent::Ubicacion);
        assert_eq!(heuristic_intent("quiero agendar una visita"), Intent::AgendarCita);
        assert_eq!(heuristic_intent("pásame con un asesor"), Intent::HablarHumano);
        assert_eq!(heuristic_intent("hola buenas tardes"), Intent::Saludo);
        assert_eq!(heuristic_intent("xyzzy"), Intent::Otro);
    }

    #[tokio::test]
    async fn disabled_classifier_still_classifies() {
        let classifier = IntentClassifier::disabled();
        assert!(!classifier.is_enabled());
        let outcome = classifier
            .classify(
                &DomainConfig::default(),
                &fixture_lead(),
                &[],
                "quiero agendar una visita",
                fixture_date(),
            )
            .await;
        assert_eq!(outcome.intent, Intent::AgendarCita);
        assert!(outcome.response.is_empty());
        assert!(!outcome.parse_error);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_keywords() {
        let backend = Arc::new(CannedBackend { reply: Err(()) });
        let classifier = IntentClassifier::new(Some(backend));
        let outcome = classifier
            .classify(
                &DomainConfig::default(),
                &fixture_lead(),
                &[],
                "precio de los terrenos",
                fixture_date(),
            )
            .await;
        assert_eq!(outcome.intent, Intent::ConsultaPrecio);
        assert!(outcome.response.is_empty());
    }

    #[tokio::test]
    async fn backend_reply_flows_through() {
        let backend = Arc::new(CannedBackend {
            reply: Ok(r#"{"intent": "saludo", "response": "¡Hola! Soy Sara 🏠"}"#.to_string()),
        });
        let classifier = IntentClassifier::new(Some(backend));
        let outcome = classifier
            .classify(
                &DomainConfig::default(),
                &fixture_lead(),
                &[],
                "hola",
                fixture_date(),
            )
            .await;
        assert_eq!(outcome.intent, Intent::Saludo);
        assert_eq!(outcome.response, "¡Hola! Soy Sara 🏠");
    }
}
