//! Staff command router
//!
//! Staff talk to the same WhatsApp number as customers; messages that
//! resolve to a team phone land here instead of the customer flow. Each
//! role has an ordered table of (usage, parser) entries and the first
//! parser that matches wins, so specific forms must be declared before
//! the general ones they would shadow.
//!
//! Unparsed messages get one rescue attempt through the LLM backend,
//! which may rewrite free text into a canonical command; anything still
//! unmatched answers with the role's help card.

pub mod advisor;
pub mod executive;
pub mod marketing;
pub mod seller;

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use sales_agent_config::DomainConfig;
use sales_agent_core::lead::ConfirmableAction;
use sales_agent_core::text::{is_affirmative, normalize};
use sales_agent_core::{
    ChatTurn, CreditStatus, FunnelStage, Lead, LeadCategory, PendingAction, StaffMember,
    StaffRole, TurnRole,
};
use sales_agent_llm::{ChatMessage, CompletionBackend};
use sales_agent_persistence::PersistenceLayer;
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::funnel::{FunnelEngine, Mover};
use crate::AgentError;

/// Everything a command handler may touch during one staff message.
pub struct CommandContext<'a> {
    pub stores: &'a PersistenceLayer,
    pub domain: &'a DomainConfig,
    pub funnel: &'a FunnelEngine,
    /// Backend for the free-text rescue; commands work without it.
    pub backend: Option<Arc<dyn CompletionBackend>>,
    pub today: NaiveDate,
}

/// A parsed staff command. One enum across roles; the per-role tables
/// decide which variants a role can reach.
#[derive(Debug, Clone, PartialEq)]
pub enum StaffCommand {
    Help,
    MyLeads,
    Search { name: String },
    History { name: String },
    MoveStage { name: String, stage: FunnelStage },
    StepForward { name: String },
    StepBack { name: String },
    Note { name: String, text: String },
    BookVisit { name: String, when: String },
    CancelVisit { name: String },
    /// Day agenda: 0 = today, 1 = tomorrow.
    Agenda { day_offset: i64 },
    CreditPipeline,
    CreditUpdate { name: String, status: CreditStatus },
    TeamOverview,
    FunnelSummary,
    Reassign { lead: String, staff: String },
    Sources,
    RegisterLead { name: String, phone: String },
}

/// One row of a role's command table. `usage` doubles as the canonical
/// form shown to the rescue model.
pub struct CommandEntry {
    pub usage: &'static str,
    pub parse: fn(&str) -> Option<StaffCommand>,
}

/// Entry point for any message from a resolved team member.
pub async fn handle_staff_message(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    message: &str,
) -> Result<(), AgentError> {
    let text = message.trim();

    let replies = match std::mem::take(&mut staff.pending_action) {
        // A confirmation question is answered by the very next message,
        // whatever it is.
        PendingAction::AwaitingConfirmation { pending } => {
            if is_affirmative(text) {
                perform_confirmed(ctx, staff, pending).await?
            } else {
                vec!["Ok, no hice cambios 👍".to_string()]
            }
        }
        PendingAction::AwaitingCustomReason { lead_id, lead_name } => {
            record_fall_reason(ctx, staff, lead_id, &lead_name, text).await?
        }
        other => {
            staff.pending_action = other;
            dispatch(ctx, staff, text).await?
        }
    };

    ctx.stores.team.upsert(staff).await?;
    for reply in replies {
        enqueue_send(&ctx.stores.outbox, &staff.phone, &reply).await;
    }
    Ok(())
}

async fn dispatch(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    text: &str,
) -> Result<Vec<String>, AgentError> {
    let role = staff.role();
    let table = table_for(role);

    if let Some((usage, cmd)) = parse_with(table, text) {
        metrics::counter!("sales_agent_staff_commands_total", "command" => usage).increment(1);
        tracing::debug!(staff = %staff.name, role = %role, command = usage, "Staff command");
        return run_command(ctx, staff, cmd).await;
    }

    if let Some((usage, cmd)) = llm_rescue(ctx, table, text).await {
        metrics::counter!("sales_agent_staff_commands_total", "command" => usage).increment(1);
        tracing::debug!(staff = %staff.name, role = %role, command = usage, "Rescued command");
        return run_command(ctx, staff, cmd).await;
    }

    Ok(vec![help_for(role).to_string()])
}

fn table_for(role: StaffRole) -> &'static [CommandEntry] {
    match role {
        StaffRole::Seller => seller::TABLE,
        StaffRole::CreditAdvisor => advisor::TABLE,
        StaffRole::Executive | StaffRole::Admin => executive::TABLE,
        StaffRole::Marketing => marketing::TABLE,
    }
}

fn help_for(role: StaffRole) -> &'static str {
    match role {
        StaffRole::Seller => seller::HELP,
        StaffRole::CreditAdvisor => advisor::HELP,
        StaffRole::Executive | StaffRole::Admin => executive::HELP,
        StaffRole::Marketing => marketing::HELP,
    }
}

/// First matching entry wins; tables are ordered for that.
pub(crate) fn parse_with(
    table: &'static [CommandEntry],
    text: &str,
) -> Option<(&'static str, StaffCommand)> {
    table
        .iter()
        .find_map(|entry| (entry.parse)(text).map(|cmd| (entry.usage, cmd)))
}

/// One shot at rewriting free text into a canonical command. The model
/// only ever picks from the role's own table, so it cannot widen what
/// the role may do.
async fn llm_rescue(
    ctx: &CommandContext<'_>,
    table: &'static [CommandEntry],
    text: &str,
) -> Option<(&'static str, StaffCommand)> {
    let backend = ctx.backend.as_ref()?;
    let catalog: Vec<&str> = table.iter().map(|e| e.usage).collect();
    let system = format!(
        "Eres el asistente interno de un equipo de ventas inmobiliario. \
         Reescribe el mensaje como UNO de estos comandos, sustituyendo \
         NOMBRE/ETAPA por lo que el mensaje mencione:\n{}\n\
         Responde solo con el comando. Si ninguno aplica responde NOCMD.",
        catalog.join("\n"),
    );
    let messages = [ChatMessage::system(system), ChatMessage::user(text)];

    match backend.complete(&messages).await {
        Ok(reply) => {
            let canonical = reply.trim();
            if canonical.eq_ignore_ascii_case("NOCMD") {
                return None;
            }
            parse_with(table, canonical)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Command rescue failed");
            None
        }
    }
}

async fn run_command(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    cmd: StaffCommand,
) -> Result<Vec<String>, AgentError> {
    match cmd {
        StaffCommand::Help => Ok(vec![help_for(staff.role()).to_string()]),
        StaffCommand::MyLeads => seller::my_leads(ctx, staff).await,
        StaffCommand::Search { name } => seller::lead_card(ctx, staff, &name).await,
        StaffCommand::History { name } => seller::history(ctx, staff, &name).await,
        StaffCommand::MoveStage { name, stage } => {
            seller::move_stage(ctx, staff, &name, stage).await
        }
        StaffCommand::StepForward { name } => {
            seller::step(ctx, staff, &name, seller::Step::Forward).await
        }
        StaffCommand::StepBack { name } => {
            seller::step(ctx, staff, &name, seller::Step::Back).await
        }
        StaffCommand::Note { name, text } => seller::note(ctx, staff, &name, &text).await,
        StaffCommand::BookVisit { name, when } => {
            seller::book_for_lead(ctx, staff, &name, &when).await
        }
        StaffCommand::CancelVisit { name } => seller::cancel_for_lead(ctx, staff, &name).await,
        StaffCommand::Agenda { day_offset } => seller::agenda(ctx, staff, day_offset).await,
        StaffCommand::CreditPipeline => advisor::pipeline(ctx, staff).await,
        StaffCommand::CreditUpdate { name, status } => {
            advisor::update_status(ctx, staff, &name, status).await
        }
        StaffCommand::TeamOverview => executive::team_overview(ctx).await,
        StaffCommand::FunnelSummary => executive::funnel_summary(ctx).await,
        StaffCommand::Reassign { lead, staff: to } => {
            executive::reassign(ctx, staff, &lead, &to).await
        }
        StaffCommand::Sources => marketing::sources(ctx).await,
        StaffCommand::RegisterLead { name, phone } => {
            marketing::register_lead(ctx, staff, &name, &phone).await
        }
    }
}

/// Run a previously confirmed action.
async fn perform_confirmed(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    pending: ConfirmableAction,
) -> Result<Vec<String>, AgentError> {
    match pending {
        ConfirmableAction::NotifyCancellation {
            lead_name,
            lead_phone,
            date,
            time,
            ..
        } => {
            let first = lead_name.split_whitespace().next().unwrap_or(&lead_name);
            let notice = notify::cancellation_for_lead(first, &date, &time);
            enqueue_send(&ctx.stores.outbox, &lead_phone, &notice).await;
            Ok(vec![format!("✅ Avisé a {lead_name} de la cancelación 👍")])
        }
        ConfirmableAction::MarkFallen { lead_id, lead_name } => {
            let Some(mut lead) = lead_by_id(ctx.stores, lead_id).await? else {
                return Ok(vec![format!("No encontré a {lead_name}, tal vez ya no existe 🤔")]);
            };
            ctx.funnel
                .move_to(&mut lead, FunnelStage::Fallen, Mover::Staff(staff))
                .await?;
            staff.pending_action = PendingAction::AwaitingCustomReason {
                lead_id,
                lead_name: lead_name.clone(),
            };
            Ok(vec![format!(
                "✅ *{lead_name}* quedó como CAÍDO y le envié la encuesta de salida.\n\n\
                 ¿Cuál fue el motivo? Escríbelo y lo dejo en su historial."
            )])
        }
    }
}

/// Store the free-text fall reason as an internal note on the lead's
/// conversation.
async fn record_fall_reason(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    lead_id: Uuid,
    lead_name: &str,
    text: &str,
) -> Result<Vec<String>, AgentError> {
    let Some(lead) = lead_by_id(ctx.stores, lead_id).await? else {
        return Ok(vec![format!("No encontré a {lead_name} para guardar el motivo 🤔")]);
    };
    let note = ChatTurn::new(
        TurnRole::System,
        format!("📝 Motivo de caída ({}): {}", staff.first_name(), text),
    );
    ctx.stores.history.append(&lead.phone, &note).await?;
    Ok(vec![format!("✅ Motivo guardado en el historial de {lead_name} 🙏")])
}

/// Result of a name lookup inside the staff member's scope.
#[derive(Debug)]
pub(crate) enum LeadMatch {
    One(Lead),
    Many(Vec<Lead>),
    None,
}

/// The leads a staff member may operate on. Executives and admins see
/// everything; advisors see leads behind their credit applications plus
/// unclaimed ones; marketing sees its own campaign leads; sellers see
/// their assignments.
pub(crate) async fn scoped_leads(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
) -> Result<Vec<Lead>, AgentError> {
    let leads = ctx.stores.leads.list_all(500).await?;
    let scoped = match staff.role() {
        role if role.bypasses_ownership() => leads,
        StaffRole::CreditAdvisor => {
            let mine: Vec<Uuid> = ctx
                .stores
                .credit
                .list_all(1000)
                .await?
                .into_iter()
                .filter(|app| app.advisor_id == Some(staff.id) || app.advisor_id.is_none())
                .map(|app| app.lead_id)
                .collect();
            leads.into_iter().filter(|l| mine.contains(&l.id)).collect()
        }
        StaffRole::Marketing => leads.into_iter().filter(|l| l.source == "marketing").collect(),
        _ => leads
            .into_iter()
            .filter(|l| l.assigned_staff_id == Some(staff.id))
            .collect(),
    };
    Ok(scoped)
}

/// Find a lead by name inside the member's scope. Exact normalized
/// match beats substring match; several hits come back for the staff
/// member to disambiguate.
pub(crate) async fn find_lead(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
) -> Result<LeadMatch, AgentError> {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return Ok(LeadMatch::None);
    }
    let scoped = scoped_leads(ctx, staff).await?;

    let exact: Vec<Lead> = scoped
        .iter()
        .filter(|l| l.name.as_deref().map(normalize) == Some(wanted.clone()))
        .cloned()
        .collect();
    let hits = if exact.is_empty() {
        scoped
            .into_iter()
            .filter(|l| {
                l.name
                    .as_deref()
                    .map(|n| normalize(n).contains(&wanted))
                    .unwrap_or(false)
            })
            .collect()
    } else {
        exact
    };

    Ok(if hits.len() > 1 {
        LeadMatch::Many(hits)
    } else if let Some(lead) = hits.into_iter().next() {
        LeadMatch::One(lead)
    } else {
        LeadMatch::None
    })
}

/// Leads are keyed by phone; confirmations carry the id, so this scans.
pub(crate) async fn lead_by_id(
    stores: &PersistenceLayer,
    id: Uuid,
) -> Result<Option<Lead>, AgentError> {
    Ok(stores
        .leads
        .list_all(500)
        .await?
        .into_iter()
        .find(|l| l.id == id))
}

pub(crate) fn not_found_reply(staff: &StaffMember, name: &str) -> String {
    if staff.role().bypasses_ownership() {
        format!("No encontré a *{name}* 🤔 Revisa el nombre con *buscar {name}*")
    } else {
        format!("No encontré a *{name}* en tus leads 🤔")
    }
}

pub(crate) fn disambiguation_reply(hits: &[Lead]) -> String {
    let lines: Vec<String> = hits
        .iter()
        .take(5)
        .map(|l| format!("• {}", lead_line(l)))
        .collect();
    format!(
        "Encontré varios 🤔 ¿Cuál de estos?\n\n{}\n\nRepite el comando con el nombre completo.",
        lines.join("\n")
    )
}

pub(crate) fn temp_icon(lead: &Lead) -> &'static str {
    match lead.category {
        LeadCategory::Hot => "🔥",
        LeadCategory::Warm => "⚠️",
        LeadCategory::Cold => "❄️",
        LeadCategory::Client => "✅",
    }
}

/// One-line lead summary used by lists and disambiguation.
pub(crate) fn lead_line(lead: &Lead) -> String {
    format!(
        "{} {} · {} · {}",
        temp_icon(lead),
        lead.score,
        notify::lead_display_name(lead),
        lead.status.label_es(),
    )
}
