//! Guided mortgage dialogue
//!
//! Walks a lead through bank, income, down payment and contact modality,
//! presents the deterministic credit simulation, then hands the file to
//! an advisor. The document branch continues after handoff when the lead
//! wants help gathering papers.

use chrono::NaiveDate;
use rand::seq::SliceRandom;

use sales_agent_config::{DomainConfig, UNDECIDED_BANK};
use sales_agent_core::credit::{credit_range, estimated_monthly_payment};
use sales_agent_core::phone::last_ten;
use sales_agent_core::text::{format_money, is_affirmative, is_negative, normalize, parse_amount};
use sales_agent_core::{
    BrokerStage, ContactModality, CreditApplication, DocChecklist, Lead, PendingAction,
    StaffMember, StaffRole, TurnRole,
};
use sales_agent_persistence::PersistenceLayer;
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::AgentError;

/// Monthly incomes below this read like typos and get echoed back for
/// confirmation instead of being accepted silently.
const INCOME_FLOOR: i64 = 5_000;

/// Assistant phrase that marks a completed handoff in the history.
const HANDOFF_MARKER: &str = "Tu asesor hipotecario es";

/// Open the credit dialogue, or the document branch when the lead was
/// already handed off. The caller persists the lead afterwards.
pub fn start(lead: &mut Lead) -> Vec<String> {
    if lead.in_survey() {
        return vec![
            "Terminemos la encuesta primero 🙏 y enseguida te ayudo con el crédito.".to_string(),
        ];
    }

    lead.needs_credit = true;
    if lead.broker_stage == Some(BrokerStage::HandedOff) {
        lead.broker_stage = Some(BrokerStage::AwaitingDocAvailability);
        return vec![docs_availability_question()];
    }

    lead.broker_stage = Some(BrokerStage::AwaitingChoice);
    vec![format!(
        "¡Excelente decisión, {}! 💳 Te puedo hacer una *simulación de crédito* \
         rápida con solo 3 datos. ¿Te la hago?\n\n\
         O si prefieres, dime *asesor* y te conecto directo con uno.",
        lead.first_name(),
    )]
}

/// One turn of the dialogue. Dispatches on the stored cursor; anything
/// unrecognized re-prompts the current stage.
pub async fn handle(
    stores: &PersistenceLayer,
    domain: &DomainConfig,
    lead: &mut Lead,
    text: &str,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    let Some(stage) = lead.broker_stage else {
        return Ok(Vec::new());
    };

    match stage {
        BrokerStage::AwaitingChoice => Ok(handle_choice(domain, lead, text)),
        BrokerStage::AwaitingBank => Ok(handle_bank(domain, lead, text)),
        BrokerStage::AwaitingIncome => Ok(handle_income(lead, text)),
        BrokerStage::AwaitingDownPayment => Ok(handle_down_payment(lead, text)),
        BrokerStage::AwaitingModality => handle_modality(stores, lead, text, today).await,
        BrokerStage::HandedOff => Ok(Vec::new()),
        BrokerStage::AwaitingDocAvailability => Ok(handle_doc_availability(lead, text)),
        BrokerStage::CollectingDocs => handle_doc_collection(stores, lead, text).await,
        BrokerStage::PendingSignature => Ok(vec![
            "Tu expediente está completo ✅ Tu asesor te contactará para la firma. \
             ¿Algo más en que pueda ayudarte?"
            .to_string(),
        ]),
    }
}

fn handle_choice(domain: &DomainConfig, lead: &mut Lead, text: &str) -> Vec<String> {
    let norm = normalize(text);
    if norm.contains("asesor") || norm.contains("directo") || is_negative(text) {
        lead.broker_stage = Some(BrokerStage::AwaitingModality);
        return vec![modality_question()];
    }
    if is_affirmative(text) {
        lead.broker_stage = Some(BrokerStage::AwaitingBank);
        return vec![bank_menu(domain)];
    }
    vec![
        "¿Te hago la simulación de crédito? Responde *sí*, o dime *asesor* para \
         conectarte directo con uno 😊"
            .to_string(),
    ]
}

fn handle_bank(domain: &DomainConfig, lead: &mut Lead, text: &str) -> Vec<String> {
    match domain.detect_bank(text) {
        Some(bank) => {
            lead.preferred_bank = Some(bank);
            lead.broker_stage = Some(BrokerStage::AwaitingIncome);
            vec!["💰 ¿Cuánto ganas al mes? (ejemplo: 25 mil)".to_string()]
        }
        None => vec![bank_menu(domain)],
    }
}

fn handle_income(lead: &mut Lead, text: &str) -> Vec<String> {
    match parse_amount(text) {
        Some(amount) if amount >= INCOME_FLOOR => {
            lead.monthly_income = Some(amount);
            lead.broker_stage = Some(BrokerStage::AwaitingDownPayment);
            vec![
                simulation_message(lead),
                "💵 ¿Cuánto tienes ahorrado para el *enganche*? \
                 (si no tienes, dime \"no tengo\")"
                    .to_string(),
            ]
        }
        Some(amount) => {
            // Suspiciously low; echo the best guess and wait for a yes.
            lead.monthly_income = Some(amount);
            vec![format!(
                "¿Confirmas que tus ingresos son *{} al mes*? Si me equivoqué, \
                 mándame la cantidad de nuevo 😊",
                format_money(amount),
            )]
        }
        None => {
            if is_affirmative(text) && lead.monthly_income.is_some() {
                lead.broker_stage = Some(BrokerStage::AwaitingDownPayment);
                return vec![
                    simulation_message(lead),
                    "💵 ¿Cuánto tienes ahorrado para el *enganche*? \
                     (si no tienes, dime \"no tengo\")"
                        .to_string(),
                ];
            }
            vec!["💰 ¿Cuánto ganas al mes? Puedes escribirlo como \"25 mil\" o \"$25,000\"".to_string()]
        }
    }
}

fn handle_down_payment(lead: &mut Lead, text: &str) -> Vec<String> {
    let norm = normalize(text);
    let amount = if norm.contains("no tengo") || norm == "nada" || is_negative(text) {
        Some(0)
    } else {
        parse_amount(text)
    };

    match amount {
        Some(v) => {
            lead.down_payment = Some(v);
            lead.broker_stage = Some(BrokerStage::AwaitingModality);
            vec![modality_question()]
        }
        None => vec![
            "¿Cuánto tienes para el enganche? Puede ser \"100 mil\", \"$50,000\" \
             o \"no tengo\" 😊"
                .to_string(),
        ],
    }
}

async fn handle_modality(
    stores: &PersistenceLayer,
    lead: &mut Lead,
    text: &str,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    match ContactModality::detect(text) {
        Some(modality) => {
            lead.contact_modality = Some(modality);
            hand_off(stores, lead, today).await
        }
        None => Ok(vec![modality_question()]),
    }
}

/// Close the dialogue: resolve an advisor, open the application, notify
/// both sides. Guarded against repeats by re-reading the history fresh.
async fn hand_off(
    stores: &PersistenceLayer,
    lead: &mut Lead,
    today: NaiveDate,
) -> Result<Vec<String>, AgentError> {
    lead.broker_stage = Some(BrokerStage::HandedOff);

    let history = stores.history.recent(&lead.phone, 30).await?;
    let already_handed = history
        .iter()
        .any(|t| t.role == TurnRole::Assistant && t.text.contains(HANDOFF_MARKER));
    if already_handed {
        return Ok(vec![
            "Ya tienes un asesor asignado 😊 Te contactará muy pronto. \
             Si necesitas algo mientras tanto, aquí estoy."
                .to_string(),
        ]);
    }

    let bank = lead
        .preferred_bank
        .clone()
        .unwrap_or_else(|| UNDECIDED_BANK.to_string());
    let advisor = resolve_advisor(stores, &bank, today).await?;

    let mut app = CreditApplication::new(
        lead.id,
        bank.as_str(),
        lead.monthly_income.unwrap_or(0),
        lead.down_payment.unwrap_or(0),
    );
    app.advisor_id = advisor.as_ref().map(|a| a.id);
    stores.credit.upsert(&app).await?;
    tracing::info!(
        phone = %lead.phone,
        bank = %bank,
        advisor = ?advisor.as_ref().map(|a| a.name.as_str()),
        "Credit application opened"
    );

    match advisor {
        Some(advisor) => {
            enqueue_send(
                &stores.outbox,
                &advisor.phone,
                &notify::credit_handoff_for_advisor(lead),
            )
            .await;
            Ok(vec![notify::advisor_contact_for_lead(lead, &advisor)])
        }
        None => {
            tracing::warn!(phone = %lead.phone, "No credit advisor available for handoff");
            Ok(vec![format!(
                "✅ ¡Listo {}! Registré tu solicitud. Un asesor hipotecario te \
                 contactará muy pronto 📞",
                lead.first_name(),
            )])
        }
    }
}

/// Advisor choice: exact bank coverage first, otherwise any available
/// advisor. Ties break toward the fewest open applications, then random.
pub(crate) async fn resolve_advisor(
    stores: &PersistenceLayer,
    bank: &str,
    today: NaiveDate,
) -> Result<Option<StaffMember>, AgentError> {
    let available: Vec<StaffMember> = stores
        .team
        .list_all()
        .await?
        .into_iter()
        .filter(|m| m.role() == StaffRole::CreditAdvisor && m.available(today))
        .collect();
    if available.is_empty() {
        return Ok(None);
    }

    let covering: Vec<StaffMember> = available
        .iter()
        .filter(|m| m.covers_bank(bank))
        .cloned()
        .collect();
    let pool = if covering.is_empty() { available } else { covering };

    let apps = stores.credit.list_all(1000).await?;
    let open_count = |id: uuid::Uuid| {
        apps.iter()
            .filter(|a| a.advisor_id == Some(id) && a.status.is_open())
            .count()
    };
    let least = pool.iter().map(|m| open_count(m.id)).min().unwrap_or(0);
    let lightest: Vec<StaffMember> = pool
        .into_iter()
        .filter(|m| open_count(m.id) == least)
        .collect();

    Ok(lightest.choose(&mut rand::thread_rng()).cloned())
}

fn handle_doc_availability(lead: &mut Lead, text: &str) -> Vec<String> {
    if is_affirmative(text) {
        let checklist = DocChecklist::new();
        lead.broker_stage = Some(BrokerStage::CollectingDocs);
        lead.pending_action = PendingAction::AwaitingDocs {
            checklist: checklist.clone(),
        };
        return vec![format!(
            "¡Perfecto! Ve mandándome los documentos y yo los voy registrando:\n\n{}\n\n\
             Dime cuál me mandas (por ejemplo: \"mi INE por el frente\").",
            checklist.missing_labels().join("\n"),
        )];
    }
    if is_negative(text) {
        lead.broker_stage = Some(BrokerStage::HandedOff);
        return vec![
            "Sin problema 😊 Cuando tengas los documentos a la mano, me avisas y \
             los registramos."
                .to_string(),
        ];
    }
    vec![docs_availability_question()]
}

async fn handle_doc_collection(
    stores: &PersistenceLayer,
    lead: &mut Lead,
    text: &str,
) -> Result<Vec<String>, AgentError> {
    let mut checklist = match &lead.pending_action {
        PendingAction::AwaitingDocs { checklist } => checklist.clone(),
        _ => DocChecklist::new(),
    };

    let changed = checklist.register_mention(text);

    if checklist.is_complete() {
        lead.broker_stage = Some(BrokerStage::PendingSignature);
        lead.pending_action = PendingAction::None;
        notify_file_complete(stores, lead).await?;
        return Ok(vec![format!(
            "{}\n\n🎉 *¡Expediente completo!* Tu asesor te contactará para la firma ✍️",
            checklist.progress_bar(),
        )]);
    }

    lead.pending_action = PendingAction::AwaitingDocs {
        checklist: checklist.clone(),
    };

    let missing = checklist.missing_labels().join("\n");

    if changed {
        Ok(vec![format!(
            "{}\n\n✅ ¡Registrado! Te falta:\n\n{missing}",
            checklist.progress_bar(),
        )])
    } else {
        Ok(vec![format!(
            "De estos documentos, ¿cuál me mandas?\n\n{missing}"
        )])
    }
}

/// Tell the advisor on the application that the paper file is complete.
async fn notify_file_complete(
    stores: &PersistenceLayer,
    lead: &Lead,
) -> Result<(), AgentError> {
    let apps = stores.credit.list_for_lead(lead.id).await?;
    let advisor_id = apps
        .iter()
        .filter(|a| a.status.is_open())
        .find_map(|a| a.advisor_id);
    let Some(advisor_id) = advisor_id else {
        return Ok(());
    };
    if let Some(advisor) = stores.team.get(advisor_id).await? {
        enqueue_send(
            &stores.outbox,
            &advisor.phone,
            &format!(
                "📂 *EXPEDIENTE COMPLETO*\n\n👤 {}\n📱 {}\n\n\
                 Todos los documentos están listos. Agenda la firma ✍️",
                lead.name.as_deref().unwrap_or("Cliente"),
                last_ten(&lead.phone),
            ),
        )
        .await;
    }
    Ok(())
}

fn bank_menu(domain: &DomainConfig) -> String {
    let list = domain
        .bank_names()
        .into_iter()
        .map(|b| format!("• {b}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "🏦 ¿Con qué banco te gustaría tu crédito?\n\n{list}\n\n\
         Si no sabes, dime \"no sé\" y te orientamos 😊"
    )
}

fn modality_question() -> String {
    "📞 ¿Cómo prefieres que te contacte tu asesor?\n\n\
     1️⃣ Llamada\n2️⃣ WhatsApp\n3️⃣ Presencial en oficina"
        .to_string()
}

fn docs_availability_question() -> String {
    "📄 Para agilizar tu crédito necesitaremos:\n\n\
     • INE (frente y reverso)\n• 3 recibos de nómina\n• Comprobante de domicilio\n\n\
     ¿Los tienes a la mano?"
        .to_string()
}

fn simulation_message(lead: &Lead) -> String {
    let income = lead.monthly_income.unwrap_or(0);
    let (low, high) = credit_range(income);
    let payment = estimated_monthly_payment(income);
    let bank = lead.preferred_bank.as_deref().unwrap_or(UNDECIDED_BANK);
    format!(
        "📊 *Tu simulación de crédito*\n\n\
         💰 Ingresos: {} al mes\n🏦 Banco: {bank}\n\
         💵 Crédito estimado: {} a {}\n📆 Mensualidad aproximada: {}\n\n\
         *Es una estimación; tu asesor te dará las cifras exactas.*",
        format_money(income),
        format_money(low),
        format_money(high),
        format_money(payment),
    )
}
