//! Executive and admin commands: the whole seller surface without the
//! ownership filter, plus team load, funnel snapshot and reassignment.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use sales_agent_core::lead::FUNNEL_ORDER;
use sales_agent_core::text::normalize;
use sales_agent_core::{FunnelStage, LeadCategory, StaffMember};
use sales_agent_tools::notify;

use crate::commands::{
    disambiguation_reply, find_lead, not_found_reply, seller, CommandContext, CommandEntry,
    LeadMatch, StaffCommand,
};
use crate::engine::enqueue_send;
use crate::AgentError;

pub(crate) const HELP: &str = "🤖 *Comandos disponibles*\n\n\
    📋 *mis leads* · toda la cartera activa\n\
    🔍 *buscar Juan* · ficha del lead\n\
    🗂️ *historial Juan* · últimos mensajes\n\
    📊 *Juan pasó a negociación* · mover de etapa\n\
    ⏭️ *Juan al siguiente* / *Juan anterior*\n\
    📝 *nota Juan: llamar el lunes*\n\
    📅 *cita Juan mañana 4pm* · agendar visita\n\
    🚫 *cancelar cita de Juan*\n\
    🕐 *mis citas* / *citas mañana*\n\
    👥 *equipo* · carga por integrante\n\
    📈 *funnel* / *resumen* · foto del embudo\n\
    🔁 *reasignar Juan a Pedro*";

/// Executive-only entries sit above the reused seller table.
pub(crate) static TABLE: &[CommandEntry] = &[
    CommandEntry { usage: "ayuda", parse: seller::parse_help },
    CommandEntry { usage: "equipo", parse: parse_team },
    CommandEntry { usage: "funnel / resumen", parse: parse_funnel },
    CommandEntry { usage: "reasignar NOMBRE a STAFF", parse: parse_reassign },
    CommandEntry { usage: "mis leads", parse: seller::parse_my_leads },
    CommandEntry { usage: "mis citas / citas manana", parse: seller::parse_agenda },
    CommandEntry { usage: "historial NOMBRE", parse: seller::parse_history },
    CommandEntry { usage: "quien es NOMBRE", parse: seller::parse_who_is },
    CommandEntry { usage: "buscar NOMBRE", parse: seller::parse_search },
    CommandEntry { usage: "nota NOMBRE: TEXTO", parse: seller::parse_note },
    CommandEntry { usage: "cancelar cita de NOMBRE", parse: seller::parse_cancel_visit },
    CommandEntry { usage: "cita NOMBRE manana 4pm", parse: seller::parse_book_visit },
    CommandEntry { usage: "NOMBRE paso a ETAPA", parse: seller::parse_passed_to },
    CommandEntry { usage: "mover NOMBRE a ETAPA", parse: seller::parse_move_to },
    CommandEntry { usage: "NOMBRE al siguiente", parse: seller::parse_step_forward },
    CommandEntry { usage: "NOMBRE anterior", parse: seller::parse_step_back },
];

pub(crate) fn parse_team(text: &str) -> Option<StaffCommand> {
    matches!(normalize(text).as_str(), "equipo" | "mi equipo").then_some(StaffCommand::TeamOverview)
}

pub(crate) fn parse_funnel(text: &str) -> Option<StaffCommand> {
    matches!(normalize(text).as_str(), "funnel" | "resumen" | "embudo")
        .then_some(StaffCommand::FunnelSummary)
}

static REASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^reasignar\s+(.+?)\s+a\s+(.+)$").unwrap());

pub(crate) fn parse_reassign(text: &str) -> Option<StaffCommand> {
    let caps = REASSIGN_RE.captures(text.trim())?;
    Some(StaffCommand::Reassign {
        lead: caps.get(1)?.as_str().trim().to_string(),
        staff: caps.get(2)?.as_str().trim().to_string(),
    })
}

/// Active roster with per-member lead counts, grouped by role.
pub(crate) async fn team_overview(ctx: &CommandContext<'_>) -> Result<Vec<String>, AgentError> {
    let mut team: Vec<_> = ctx
        .stores
        .team
        .list_all()
        .await?
        .into_iter()
        .filter(|m| m.active)
        .collect();
    if team.is_empty() {
        return Ok(vec!["No hay equipo registrado todavía 📭".to_string()]);
    }
    team.sort_by(|a, b| (a.role().as_str(), &a.name).cmp(&(b.role().as_str(), &b.name)));

    let leads = ctx.stores.leads.list_all(1000).await?;
    let lines: Vec<String> = team
        .iter()
        .map(|m| {
            let n = leads
                .iter()
                .filter(|l| l.assigned_staff_id == Some(m.id))
                .count();
            format!("• {} · {} · {} leads", m.name, m.role().label_es(), n)
        })
        .collect();
    Ok(vec![format!(
        "👥 *Equipo* ({}):\n\n{}",
        lines.len(),
        lines.join("\n"),
    )])
}

/// Stage-by-stage head count plus the hot-lead tally.
pub(crate) async fn funnel_summary(ctx: &CommandContext<'_>) -> Result<Vec<String>, AgentError> {
    let leads = ctx.stores.leads.list_all(1000).await?;
    if leads.is_empty() {
        return Ok(vec!["Aún no hay leads en el funnel 📭".to_string()]);
    }

    let mut lines = Vec::new();
    for stage in FUNNEL_ORDER {
        let n = leads.iter().filter(|l| l.status == stage).count();
        lines.push(format!("▸ {}: {}", stage.label_es(), n));
    }
    let fallen = leads
        .iter()
        .filter(|l| l.status == FunnelStage::Fallen)
        .count();
    lines.push(format!("▸ {}: {}", FunnelStage::Fallen.label_es(), fallen));

    let hot = leads
        .iter()
        .filter(|l| l.category == LeadCategory::Hot)
        .count();
    Ok(vec![format!(
        "📊 *Resumen del funnel* ({} leads):\n\n{}\n\n🔥 Leads HOT: {}",
        leads.len(),
        lines.join("\n"),
        hot,
    )])
}

/// Hand a lead to another team member and ping the new owner.
pub(crate) async fn reassign(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    lead_name: &str,
    staff_name: &str,
) -> Result<Vec<String>, AgentError> {
    let mut lead = match find_lead(ctx, staff, lead_name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, lead_name)]),
    };
    let shown = notify::lead_display_name(&lead);

    let wanted = normalize(staff_name);
    let target = ctx
        .stores
        .team
        .list_all()
        .await?
        .into_iter()
        .filter(|m| m.active)
        .find(|m| {
            let full = normalize(&m.name);
            full == wanted || full.contains(&wanted) || normalize(m.first_name()) == wanted
        });
    let Some(target) = target else {
        return Ok(vec![format!(
            "No encontré a nadie del equipo llamado *{staff_name}* 🤔"
        )]);
    };

    lead.assigned_staff_id = Some(target.id);
    lead.updated_at = Utc::now();
    ctx.stores.leads.upsert(&lead).await?;
    tracing::info!(lead = %lead.phone, to = %target.name, "Lead reassigned");

    enqueue_send(
        &ctx.stores.outbox,
        &target.phone,
        &notify::reassignment_for_staff(&lead, staff.first_name()),
    )
    .await;

    Ok(vec![format!(
        "✅ *{shown}* reasignado a {} 👍",
        target.name
    )])
}
