//! Seller commands: cartera, lead cards, funnel moves, notes and the
//! booking shortcuts. Executives reuse this table without the ownership
//! filter, which `find_lead` applies by role.

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;

use sales_agent_core::dates::{
    format_date_es, format_time_12h, parse_spanish_date, parse_spanish_time,
};
use sales_agent_core::lead::ConfirmableAction;
use sales_agent_core::phone::last_ten;
use sales_agent_core::text::normalize;
use sales_agent_core::{ChatTurn, FunnelStage, Lead, PendingAction, StaffMember, TurnRole};
use sales_agent_tools::notify;

use crate::commands::{
    disambiguation_reply, find_lead, lead_line, not_found_reply, scoped_leads, temp_icon,
    CommandContext, CommandEntry, LeadMatch, StaffCommand,
};
use crate::engine::enqueue_send;
use crate::funnel::Mover;
use crate::scheduler::{self, VisitRequest};
use crate::AgentError;

pub(crate) const HELP: &str = "🤖 *Comandos disponibles*\n\n\
    📋 *mis leads* · tu cartera activa\n\
    🔍 *buscar Juan* · ficha del lead\n\
    🗂️ *historial Juan* · últimos mensajes\n\
    📊 *Juan pasó a negociación* · mover de etapa\n\
    ⏭️ *Juan al siguiente* / *Juan anterior*\n\
    📝 *nota Juan: llamar el lunes*\n\
    📅 *cita Juan mañana 4pm* · agendar visita\n\
    🚫 *cancelar cita de Juan*\n\
    🕐 *mis citas* / *citas mañana*";

/// Ordered: exact phrases first, then prefixed forms, then the
/// free-shape stage moves that would otherwise swallow them.
pub(crate) static TABLE: &[CommandEntry] = &[
    CommandEntry { usage: "ayuda", parse: parse_help },
    CommandEntry { usage: "mis leads", parse: parse_my_leads },
    CommandEntry { usage: "mis citas / citas manana", parse: parse_agenda },
    CommandEntry { usage: "historial NOMBRE", parse: parse_history },
    CommandEntry { usage: "quien es NOMBRE", parse: parse_who_is },
    CommandEntry { usage: "buscar NOMBRE", parse: parse_search },
    CommandEntry { usage: "nota NOMBRE: TEXTO", parse: parse_note },
    CommandEntry { usage: "cancelar cita de NOMBRE", parse: parse_cancel_visit },
    CommandEntry { usage: "cita NOMBRE manana 4pm", parse: parse_book_visit },
    CommandEntry { usage: "NOMBRE paso a ETAPA", parse: parse_passed_to },
    CommandEntry { usage: "mover NOMBRE a ETAPA", parse: parse_move_to },
    CommandEntry { usage: "NOMBRE al siguiente", parse: parse_step_forward },
    CommandEntry { usage: "NOMBRE anterior", parse: parse_step_back },
];

pub(crate) fn parse_help(text: &str) -> Option<StaffCommand> {
    matches!(normalize(text).as_str(), "ayuda" | "help" | "comandos").then_some(StaffCommand::Help)
}

pub(crate) fn parse_my_leads(text: &str) -> Option<StaffCommand> {
    matches!(
        normalize(text).as_str(),
        "mis leads" | "mis clientes" | "mi cartera"
    )
    .then_some(StaffCommand::MyLeads)
}

pub(crate) fn parse_agenda(text: &str) -> Option<StaffCommand> {
    match normalize(text).as_str() {
        "mis citas" | "citas" | "citas hoy" | "agenda" => {
            Some(StaffCommand::Agenda { day_offset: 0 })
        }
        "citas manana" | "mis citas manana" => Some(StaffCommand::Agenda { day_offset: 1 }),
        _ => None,
    }
}

static HISTORY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^historial\s+(.+)$").unwrap());

pub(crate) fn parse_history(text: &str) -> Option<StaffCommand> {
    let caps = HISTORY_RE.captures(text.trim())?;
    Some(StaffCommand::History {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

static WHO_IS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^qui[eé]n\s+es\s+(.+)$").unwrap());

pub(crate) fn parse_who_is(text: &str) -> Option<StaffCommand> {
    let caps = WHO_IS_RE.captures(text.trim())?;
    Some(StaffCommand::Search {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

static SEARCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^buscar\s+(.+)$").unwrap());

pub(crate) fn parse_search(text: &str) -> Option<StaffCommand> {
    let caps = SEARCH_RE.captures(text.trim())?;
    Some(StaffCommand::Search {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

static NOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^nota\s+([^:]+):\s*(.+)$").unwrap());

pub(crate) fn parse_note(text: &str) -> Option<StaffCommand> {
    let caps = NOTE_RE.captures(text.trim())?;
    Some(StaffCommand::Note {
        name: caps.get(1)?.as_str().trim().to_string(),
        text: caps.get(2)?.as_str().trim().to_string(),
    })
}

static CANCEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^cancelar\s+cita(?:\s+de)?\s+(.+)$").unwrap());

pub(crate) fn parse_cancel_visit(text: &str) -> Option<StaffCommand> {
    let caps = CANCEL_RE.captures(text.trim())?;
    Some(StaffCommand::CancelVisit {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

static BOOK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^cita\s+(.+)$").unwrap());

pub(crate) fn parse_book_visit(text: &str) -> Option<StaffCommand> {
    let caps = BOOK_RE.captures(text.trim())?;
    let (name, when) = split_name_and_when(caps.get(1)?.as_str())?;
    Some(StaffCommand::BookVisit { name, when })
}

/// "Juan Pérez mañana 4pm" → ("Juan Pérez", "mañana 4pm"). The name is
/// everything before the first token that reads as a date or time.
fn split_name_and_when(arg: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = arg.split_whitespace().collect();
    let split = tokens
        .iter()
        .position(|t| is_when_marker(t))
        .unwrap_or(tokens.len());

    let mut name_tokens = &tokens[..split];
    // Trailing connectors belong to neither part.
    while let Some(last) = name_tokens.last() {
        if matches!(normalize(last).as_str(), "el" | "a" | "para" | "las") {
            name_tokens = &name_tokens[..name_tokens.len() - 1];
        } else {
            break;
        }
    }
    if name_tokens.is_empty() {
        return None;
    }
    Some((name_tokens.join(" "), tokens[split..].join(" ")))
}

fn is_when_marker(token: &str) -> bool {
    let norm = normalize(token);
    norm.chars().any(|c| c.is_ascii_digit())
        || matches!(
            norm.as_str(),
            "hoy"
                | "manana"
                | "pasado"
                | "lunes"
                | "martes"
                | "miercoles"
                | "jueves"
                | "viernes"
                | "sabado"
                | "domingo"
                | "mediodia"
        )
}

static PASSED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+pas[oó]\s+a\s+(.+)$").unwrap());

pub(crate) fn parse_passed_to(text: &str) -> Option<StaffCommand> {
    let caps = PASSED_RE.captures(text.trim())?;
    let stage = FunnelStage::from_str(caps.get(2)?.as_str())?;
    Some(StaffCommand::MoveStage {
        name: caps.get(1)?.as_str().trim().to_string(),
        stage,
    })
}

static MOVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^mover\s+(.+?)\s+a\s+(.+)$").unwrap());

pub(crate) fn parse_move_to(text: &str) -> Option<StaffCommand> {
    let caps = MOVE_RE.captures(text.trim())?;
    let stage = FunnelStage::from_str(caps.get(2)?.as_str())?;
    Some(StaffCommand::MoveStage {
        name: caps.get(1)?.as_str().trim().to_string(),
        stage,
    })
}

static STEP_FORWARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+al\s+siguiente$").unwrap());

pub(crate) fn parse_step_forward(text: &str) -> Option<StaffCommand> {
    let caps = STEP_FORWARD_RE.captures(text.trim())?;
    Some(StaffCommand::StepForward {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

static STEP_BACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+(?:al\s+)?anterior$").unwrap());

pub(crate) fn parse_step_back(text: &str) -> Option<StaffCommand> {
    let caps = STEP_BACK_RE.captures(text.trim())?;
    Some(StaffCommand::StepBack {
        name: caps.get(1)?.as_str().trim().to_string(),
    })
}

/// Direction for the one-step funnel shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Forward,
    Back,
}

pub(crate) async fn my_leads(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
) -> Result<Vec<String>, AgentError> {
    let mut leads = scoped_leads(ctx, staff).await?;
    leads.retain(|l| !l.status.is_terminal());
    if leads.is_empty() {
        return Ok(vec!["No tienes leads activos por ahora 📭".to_string()]);
    }
    leads.sort_by(|a, b| b.score.cmp(&a.score));
    let total = leads.len();
    let lines: Vec<String> = leads.iter().take(15).map(lead_line).collect();
    let mut msg = format!("📋 *Tus leads activos* ({total}):\n\n{}", lines.join("\n"));
    if total > 15 {
        msg.push_str("\n\nMuestro los 15 más calientes; usa *buscar NOMBRE* para el resto.");
    }
    Ok(vec![msg])
}

pub(crate) async fn lead_card(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
) -> Result<Vec<String>, AgentError> {
    let lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    Ok(vec![render_card(ctx, &lead).await?])
}

async fn render_card(ctx: &CommandContext<'_>, lead: &Lead) -> Result<String, AgentError> {
    let owner = match lead.assigned_staff_id {
        Some(id) => ctx.stores.team.get(id).await?.map(|m| m.name),
        None => None,
    };
    let credit_line = if lead.needs_credit {
        match &lead.preferred_bank {
            Some(bank) => format!("Sí ({bank})"),
            None => "Sí".to_string(),
        }
    } else {
        "No".to_string()
    };
    Ok(format!(
        "👤 *{}*\n📱 {}\n📊 {} · {}/100 {}\n🏠 Interés: {}\n💳 Crédito: {}\n\
         📣 Fuente: {}\n👔 Atiende: {}\n🗓️ Alta: {}",
        notify::lead_display_name(lead),
        last_ten(&lead.phone),
        lead.status.label_es(),
        lead.score,
        temp_icon(lead),
        lead.property_interest.as_deref().unwrap_or("Por definir"),
        credit_line,
        lead.source,
        owner.as_deref().unwrap_or("Sin asignar"),
        lead.created_at.format("%d/%m/%Y"),
    ))
}

pub(crate) async fn history(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
) -> Result<Vec<String>, AgentError> {
    let lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);
    let turns = ctx.stores.history.recent(&lead.phone, 10).await?;
    if turns.is_empty() {
        return Ok(vec![format!("Sin historial todavía para *{shown}* 📭")]);
    }
    let lines: Vec<String> = turns
        .iter()
        .map(|t| {
            let icon = match t.role {
                TurnRole::User => "👤",
                TurnRole::Assistant => "🤖",
                TurnRole::System => "📝",
            };
            format!("{icon} {}", clip(&t.text))
        })
        .collect();
    Ok(vec![format!(
        "🗂️ *Historial de {shown}* (últimos {}):\n\n{}",
        turns.len(),
        lines.join("\n"),
    )])
}

fn clip(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push('…');
    }
    out
}

pub(crate) async fn move_stage(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    name: &str,
    stage: FunnelStage,
) -> Result<Vec<String>, AgentError> {
    let mut lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);

    // Fallen kicks off the exit survey, so it gets a confirmation step.
    if stage == FunnelStage::Fallen {
        staff.pending_action = PendingAction::AwaitingConfirmation {
            pending: ConfirmableAction::MarkFallen {
                lead_id: lead.id,
                lead_name: shown.clone(),
            },
        };
        return Ok(vec![format!(
            "⚠️ ¿Marco a *{shown}* como CAÍDO? Se le enviará la encuesta de salida. (sí/no)"
        )]);
    }

    if lead.status == stage {
        return Ok(vec![format!("*{shown}* ya está en {} 😉", stage.label_es())]);
    }
    let moved = ctx.funnel.move_to(&mut lead, stage, Mover::Staff(staff)).await?;
    Ok(vec![format!(
        "✅ *{shown}*: {} → {}",
        moved.from.label_es(),
        moved.to.label_es(),
    )])
}

pub(crate) async fn step(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    name: &str,
    dir: Step,
) -> Result<Vec<String>, AgentError> {
    let mut lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);

    if lead.status == FunnelStage::Fallen {
        return Ok(vec![format!(
            "*{shown}* está CAÍDO. Usa *{shown} pasó a ETAPA* para reactivarlo 😊"
        )]);
    }
    let target = match dir {
        Step::Forward => lead.status.next(),
        Step::Back => lead.status.previous(),
    };
    let Some(stage) = target else {
        let edge = match dir {
            Step::Forward => "última",
            Step::Back => "primera",
        };
        return Ok(vec![format!(
            "*{shown}* ya está en la {edge} etapa ({})",
            lead.status.label_es(),
        )]);
    };
    let moved = ctx.funnel.move_to(&mut lead, stage, Mover::Staff(staff)).await?;
    Ok(vec![format!(
        "✅ *{shown}*: {} → {}",
        moved.from.label_es(),
        moved.to.label_es(),
    )])
}

pub(crate) async fn note(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
    text: &str,
) -> Result<Vec<String>, AgentError> {
    let lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let turn = ChatTurn::new(
        TurnRole::System,
        format!("📝 Nota de {}: {}", staff.first_name(), text),
    );
    ctx.stores.history.append(&lead.phone, &turn).await?;
    Ok(vec![format!(
        "✅ Nota guardada para *{}* 📝",
        notify::lead_display_name(&lead),
    )])
}

/// Book a visit on behalf of a lead. The customer-facing confirmation
/// goes to the customer; the staff member gets a short ack. When a
/// booking guard refuses (past date, closed hours) the guard text stays
/// with the staff member instead of reaching the customer.
pub(crate) async fn book_for_lead(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    name: &str,
    when: &str,
) -> Result<Vec<String>, AgentError> {
    let mut lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);

    let (Some(date), Some(time)) = (parse_spanish_date(when, ctx.today), parse_spanish_time(when))
    else {
        return Ok(vec![format!(
            "No entendí la fecha y hora 😅 Ejemplo: *cita {shown} mañana 4pm*"
        )]);
    };

    let request = VisitRequest {
        name: Some(shown.clone()),
        phone: Some(lead.phone.clone()),
        date: Some(date),
        time: Some(time),
        property_hint: lead.property_interest.clone(),
    };
    let replies = scheduler::book_visit(
        ctx.stores,
        ctx.domain,
        ctx.funnel,
        &mut lead,
        &request,
        Mover::Staff(staff),
        ctx.today,
    )
    .await?;

    let booked = ctx
        .stores
        .appointments
        .list_for_lead(&lead.phone)
        .await?
        .into_iter()
        .any(|a| a.is_active() && a.date == date && a.time == time);

    if booked {
        for reply in &replies {
            enqueue_send(&ctx.stores.outbox, &lead.phone, reply).await;
        }
        Ok(vec![format!(
            "✅ Cita agendada: *{shown}* el {} a las {} 📅",
            format_date_es(date),
            format_time_12h(time),
        )])
    } else {
        Ok(replies)
    }
}

pub(crate) async fn cancel_for_lead(
    ctx: &CommandContext<'_>,
    staff: &mut StaffMember,
    name: &str,
) -> Result<Vec<String>, AgentError> {
    let lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);

    let cancelled = scheduler::cancel_active(ctx.stores, &lead).await?;
    let Some(last) = cancelled.last() else {
        return Ok(vec![format!("*{shown}* no tiene citas activas 📭")]);
    };

    if let Some(owner_id) = lead.assigned_staff_id {
        if owner_id != staff.id {
            if let Some(owner) = ctx.stores.team.get(owner_id).await? {
                for appt in &cancelled {
                    enqueue_send(
                        &ctx.stores.outbox,
                        &owner.phone,
                        &notify::cancellation_for_seller(appt),
                    )
                    .await;
                }
            }
        }
    }

    let date = format_date_es(last.date);
    let time = format_time_12h(last.time);
    staff.pending_action = PendingAction::AwaitingConfirmation {
        pending: ConfirmableAction::NotifyCancellation {
            lead_id: lead.id,
            lead_name: shown.clone(),
            lead_phone: lead.phone.clone(),
            date: date.clone(),
            time: time.clone(),
        },
    };
    Ok(vec![format!(
        "✅ Cita de *{shown}* cancelada ({date} a las {time}).\n\n¿Le aviso al cliente? (sí/no)"
    )])
}

pub(crate) async fn agenda(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    day_offset: i64,
) -> Result<Vec<String>, AgentError> {
    let target = ctx.today + Duration::days(day_offset);
    let mut appts: Vec<_> = ctx
        .stores
        .appointments
        .list_all(500)
        .await?
        .into_iter()
        .filter(|a| a.is_active() && a.date == target)
        .filter(|a| staff.role().bypasses_ownership() || a.staff_id == Some(staff.id))
        .collect();

    let label = if day_offset == 0 { "hoy" } else { "mañana" };
    if appts.is_empty() {
        return Ok(vec![format!("No tienes citas para {label} 📭")]);
    }
    appts.sort_by_key(|a| a.time);
    let lines: Vec<String> = appts
        .iter()
        .map(|a| {
            format!(
                "🕐 {} · {} · {} ({})",
                format_time_12h(a.time),
                a.lead_name,
                a.property,
                a.kind.label_es(),
            )
        })
        .collect();
    Ok(vec![format!(
        "📅 *Citas de {label}* ({}):\n\n{}",
        lines.len(),
        lines.join("\n"),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::parse_with;
    use crate::funnel::FunnelEngine;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use sales_agent_config::DomainConfig;
    use sales_agent_core::{Appointment, AppointmentKind, AppointmentStatus};
    use sales_agent_persistence::{init_in_memory, PersistenceLayer, TaskKind};

    fn today() -> NaiveDate {
        // A Monday.
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn parsed(text: &str) -> Option<StaffCommand> {
        parse_with(TABLE, text).map(|(_, cmd)| cmd)
    }

    #[test]
    fn help_keywords_parse() {
        assert_eq!(parsed("ayuda"), Some(StaffCommand::Help));
        assert_eq!(parsed("Comandos"), Some(StaffCommand::Help));
        assert_eq!(parsed("help"), Some(StaffCommand::Help));
    }

    #[test]
    fn my_leads_parses() {
        assert_eq!(parsed("mis leads"), Some(StaffCommand::MyLeads));
        assert_eq!(parsed("Mis clientes"), Some(StaffCommand::MyLeads));
    }

    #[test]
    fn agenda_parses_today_and_tomorrow() {
        assert_eq!(parsed("mis citas"), Some(StaffCommand::Agenda { day_offset: 0 }));
        assert_eq!(
            parsed("citas mañana"),
            Some(StaffCommand::Agenda { day_offset: 1 })
        );
    }

    #[test]
    fn historial_parses() {
        assert_eq!(
            parsed("historial Juan Pérez"),
            Some(StaffCommand::History {
                name: "Juan Pérez".to_string()
            })
        );
    }

    #[test]
    fn quien_es_parses_with_accent() {
        assert_eq!(
            parsed("quién es Juan"),
            Some(StaffCommand::Search {
                name: "Juan".to_string()
            })
        );
        assert_eq!(
            parsed("quien es Ana López"),
            Some(StaffCommand::Search {
                name: "Ana López".to_string()
            })
        );
    }

    #[test]
    fn buscar_parses() {
        assert_eq!(
            parsed("buscar Pedro"),
            Some(StaffCommand::Search {
                name: "Pedro".to_string()
            })
        );
    }

    #[test]
    fn nota_splits_name_and_text() {
        assert_eq!(
            parsed("nota Juan: llamar el lunes temprano"),
            Some(StaffCommand::Note {
                name: "Juan".to_string(),
                text: "llamar el lunes temprano".to_string()
            })
        );
    }

    #[test]
    fn cancelar_cita_wins_over_cita() {
        assert_eq!(
            parsed("cancelar cita de Juan"),
            Some(StaffCommand::CancelVisit {
                name: "Juan".to_string()
            })
        );
        assert_eq!(
            parsed("cancelar cita Juan"),
            Some(StaffCommand::CancelVisit {
                name: "Juan".to_string()
            })
        );
    }

    #[test]
    fn cita_splits_name_from_schedule() {
        let cmd = parsed("cita Juan Pérez mañana 4pm");
        match cmd {
            Some(StaffCommand::BookVisit { name, when }) => {
                assert_eq!(name, "Juan Pérez");
                assert!(when.contains("mañana"));
                assert!(when.contains("4pm"));
            }
            other => panic!("expected BookVisit, got {other:?}"),
        }
        // Connector before the date is dropped from the name.
        match parsed("cita Ana el viernes a las 10am") {
            Some(StaffCommand::BookVisit { name, .. }) => assert_eq!(name, "Ana"),
            other => panic!("expected BookVisit, got {other:?}"),
        }
    }

    #[test]
    fn paso_a_parses_stages_and_aliases() {
        assert_eq!(
            parsed("Juan pasó a negociación"),
            Some(StaffCommand::MoveStage {
                name: "Juan".to_string(),
                stage: FunnelStage::Negotiation
            })
        );
        assert_eq!(
            parsed("Ana paso a apartado"),
            Some(StaffCommand::MoveStage {
                name: "Ana".to_string(),
                stage: FunnelStage::Reserved
            })
        );
        assert_eq!(
            parsed("Juan pasó a caído"),
            Some(StaffCommand::MoveStage {
                name: "Juan".to_string(),
                stage: FunnelStage::Fallen
            })
        );
    }

    #[test]
    fn mover_a_parses_multiword_names_and_stages() {
        assert_eq!(
            parsed("mover Ana María López a cita agendada"),
            Some(StaffCommand::MoveStage {
                name: "Ana María López".to_string(),
                stage: FunnelStage::Scheduled
            })
        );
    }

    #[test]
    fn unknown_stage_does_not_parse() {
        assert_eq!(parsed("Juan pasó a la luna"), None);
        assert_eq!(parsed("mover Juan a ninguna parte"), None);
    }

    #[test]
    fn siguiente_parses() {
        assert_eq!(
            parsed("Juan al siguiente"),
            Some(StaffCommand::StepForward {
                name: "Juan".to_string()
            })
        );
    }

    #[test]
    fn anterior_parses() {
        assert_eq!(
            parsed("Juan anterior"),
            Some(StaffCommand::StepBack {
                name: "Juan".to_string()
            })
        );
        assert_eq!(
            parsed("Ana al anterior"),
            Some(StaffCommand::StepBack {
                name: "Ana".to_string()
            })
        );
    }

    struct Fixture {
        stores: PersistenceLayer,
        domain: DomainConfig,
        funnel: FunnelEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let stores = init_in_memory();
            let funnel = FunnelEngine::new(stores.clone());
            Self {
                stores,
                domain: DomainConfig::default(),
                funnel,
            }
        }

        fn ctx(&self) -> CommandContext<'_> {
            CommandContext {
                stores: &self.stores,
                domain: &self.domain,
                funnel: &self.funnel,
                backend: None,
                today: today(),
            }
        }

        async fn sends_to(&self, phone: &str) -> Vec<String> {
            self.stores
                .outbox
                .due(Utc::now() + Duration::days(2), 100)
                .await
                .unwrap()
                .into_iter()
                .filter(|t| t.kind == TaskKind::SendMessage && t.payload["to"] == phone)
                .map(|t| t.payload["body"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    fn seller() -> StaffMember {
        StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor")
    }

    fn owned_lead(name: &str, phone: &str, owner: &StaffMember) -> Lead {
        let mut lead = Lead::new(phone, "whatsapp");
        lead.name = Some(name.to_string());
        lead.assigned_staff_id = Some(owner.id);
        lead
    }

    #[tokio::test]
    async fn my_leads_sorts_by_score_and_counts() {
        let fx = Fixture::new();
        let staff = seller();

        let mut cold = owned_lead("Pedro Gómez", "4929110011", &staff);
        cold.apply_stage(FunnelStage::New);
        let mut hot = owned_lead("Juan Pérez", "4929110022", &staff);
        hot.apply_stage(FunnelStage::Negotiation);
        fx.stores.leads.upsert(&cold).await.unwrap();
        fx.stores.leads.upsert(&hot).await.unwrap();

        let replies = my_leads(&fx.ctx(), &staff).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("(2)"));
        let juan = replies[0].find("Juan Pérez").unwrap();
        let pedro = replies[0].find("Pedro Gómez").unwrap();
        assert!(juan < pedro, "hottest lead should list first");
    }

    #[tokio::test]
    async fn card_shows_stage_and_owner() {
        let fx = Fixture::new();
        let staff = seller();
        fx.stores.team.upsert(&staff).await.unwrap();
        let mut lead = owned_lead("Juan Pérez", "4929110022", &staff);
        lead.apply_stage(FunnelStage::Negotiation);
        lead.property_interest = Some("Monte Verde".to_string());
        fx.stores.leads.upsert(&lead).await.unwrap();

        let replies = lead_card(&fx.ctx(), &staff, "Juan").await.unwrap();
        assert!(replies[0].contains("Juan Pérez"));
        assert!(replies[0].contains("NEGOCIACIÓN"));
        assert!(replies[0].contains("85/100"));
        assert!(replies[0].contains("Monte Verde"));
        assert!(replies[0].contains("Pedro Ruiz"));
    }

    #[tokio::test]
    async fn foreign_lead_reads_as_not_found() {
        let fx = Fixture::new();
        let mine = seller();
        let other = StaffMember::new("Laura Díaz", "5214921110002", "Vendedora");
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &other))
            .await
            .unwrap();

        let mut staff = mine;
        let replies = move_stage(&fx.ctx(), &mut staff, "Juan", FunnelStage::Negotiation)
            .await
            .unwrap();
        assert!(replies[0].contains("No encontré"));
        assert!(replies[0].contains("en tus leads"));

        let stored = fx.stores.leads.get("4929110022").await.unwrap().unwrap();
        assert_eq!(stored.status, FunnelStage::New);
    }

    #[tokio::test]
    async fn move_stage_moves_and_reports() {
        let fx = Fixture::new();
        let mut staff = seller();
        fx.stores.team.upsert(&staff).await.unwrap();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = move_stage(&fx.ctx(), &mut staff, "Juan", FunnelStage::Negotiation)
            .await
            .unwrap();
        assert!(replies[0].contains("NUEVO"));
        assert!(replies[0].contains("NEGOCIACIÓN"));

        let stored = fx.stores.leads.get("4929110022").await.unwrap().unwrap();
        assert_eq!(stored.status, FunnelStage::Negotiation);
        assert_eq!(stored.score, 85);
    }

    #[tokio::test]
    async fn fallen_asks_for_confirmation_first() {
        let fx = Fixture::new();
        let mut staff = seller();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = move_stage(&fx.ctx(), &mut staff, "Juan", FunnelStage::Fallen)
            .await
            .unwrap();
        assert!(replies[0].contains("¿Marco a *Juan Pérez* como CAÍDO?"));
        assert!(matches!(
            staff.pending_action,
            PendingAction::AwaitingConfirmation { .. }
        ));
        // Nothing moved yet.
        let stored = fx.stores.leads.get("4929110022").await.unwrap().unwrap();
        assert_eq!(stored.status, FunnelStage::New);
    }

    #[tokio::test]
    async fn steps_walk_the_funnel_and_clamp_at_the_ends() {
        let fx = Fixture::new();
        let mut staff = seller();
        fx.stores.team.upsert(&staff).await.unwrap();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = step(&fx.ctx(), &mut staff, "Juan", Step::Forward).await.unwrap();
        assert!(replies[0].contains("CONTACTADO"));

        let replies = step(&fx.ctx(), &mut staff, "Juan", Step::Back).await.unwrap();
        assert!(replies[0].contains("NUEVO"));

        let replies = step(&fx.ctx(), &mut staff, "Juan", Step::Back).await.unwrap();
        assert!(replies[0].contains("primera etapa"));

        let mut delivered = owned_lead("Ana López", "4929110033", &staff);
        delivered.apply_stage(FunnelStage::Delivered);
        fx.stores.leads.upsert(&delivered).await.unwrap();
        let replies = step(&fx.ctx(), &mut staff, "Ana", Step::Forward).await.unwrap();
        assert!(replies[0].contains("última etapa"));
    }

    #[tokio::test]
    async fn note_lands_in_the_lead_history() {
        let fx = Fixture::new();
        let staff = seller();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = note(&fx.ctx(), &staff, "Juan", "prefiere llamadas por la tarde")
            .await
            .unwrap();
        assert!(replies[0].contains("Nota guardada"));

        let turns = fx.stores.history.recent("4929110022", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::System);
        assert!(turns[0].text.contains("Pedro"));
        assert!(turns[0].text.contains("prefiere llamadas por la tarde"));
    }

    #[tokio::test]
    async fn booking_for_a_lead_notifies_both_sides() {
        let fx = Fixture::new();
        let mut staff = seller();
        fx.stores.team.upsert(&staff).await.unwrap();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = book_for_lead(&fx.ctx(), &mut staff, "Juan", "mañana 4pm")
            .await
            .unwrap();
        assert!(replies[0].contains("Cita agendada"));
        assert!(replies[0].contains("4:00 PM"));

        let rows = fx.stores.appointments.list_for_lead("4929110022").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AppointmentStatus::Scheduled);
        assert_eq!(rows[0].staff_id, Some(staff.id));

        // Customer got the welcome plus the confirmation.
        let to_lead = fx.sends_to("4929110022").await;
        assert!(to_lead.iter().any(|b| b.contains("tu cita está confirmada")));
        // The seller alert went to the booking seller.
        let to_staff = fx.sends_to(&staff.phone).await;
        assert!(to_staff.iter().any(|b| b.contains("¡NUEVA CITA!")));
    }

    #[tokio::test]
    async fn booking_without_a_readable_date_hints_usage() {
        let fx = Fixture::new();
        let mut staff = seller();
        fx.stores
            .leads
            .upsert(&owned_lead("Juan Pérez", "4929110022", &staff))
            .await
            .unwrap();

        let replies = book_for_lead(&fx.ctx(), &mut staff, "Juan", "").await.unwrap();
        assert!(replies[0].contains("No entendí la fecha"));
        assert!(fx
            .stores
            .appointments
            .list_for_lead("4929110022")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cancelling_asks_whether_to_tell_the_customer() {
        let fx = Fixture::new();
        let mut staff = seller();
        let lead = owned_lead("Juan Pérez", "4929110022", &staff);
        fx.stores.leads.upsert(&lead).await.unwrap();

        let mut appt = Appointment::new(
            lead.id,
            "Juan Pérez",
            "4929110022",
            "Monte Verde",
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            AppointmentKind::SalesVisit,
        );
        appt.staff_id = Some(staff.id);
        fx.stores.appointments.upsert(&appt).await.unwrap();

        let replies = cancel_for_lead(&fx.ctx(), &mut staff, "Juan").await.unwrap();
        assert!(replies[0].contains("cancelada"));
        assert!(replies[0].contains("¿Le aviso al cliente?"));

        let stored = fx
            .stores
            .appointments
            .get("4929110022", appt.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);

        match &staff.pending_action {
            PendingAction::AwaitingConfirmation {
                pending: ConfirmableAction::NotifyCancellation { date, time, .. },
            } => {
                assert_eq!(date, "viernes 14 de marzo");
                assert_eq!(time, "4:00 PM");
            }
            other => panic!("expected a cancellation confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agenda_filters_by_day_and_owner() {
        let fx = Fixture::new();
        let staff = seller();
        let other = StaffMember::new("Laura Díaz", "5214921110002", "Vendedora");

        let lead = owned_lead("Juan Pérez", "4929110022", &staff);
        let mk = |name: &str, phone: &str, date: NaiveDate, hour: u32, who: &StaffMember| {
            let mut a = Appointment::new(
                lead.id,
                name,
                phone,
                "Monte Verde",
                date,
                NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                AppointmentKind::SalesVisit,
            );
            a.staff_id = Some(who.id);
            a
        };
        fx.stores
            .appointments
            .upsert(&mk("Juan Pérez", "4929110022", today(), 16, &staff))
            .await
            .unwrap();
        fx.stores
            .appointments
            .upsert(&mk("Ana López", "4929110033", today(), 11, &other))
            .await
            .unwrap();
        fx.stores
            .appointments
            .upsert(&mk(
                "Pedro Gómez",
                "4929110044",
                today() + Duration::days(1),
                10,
                &staff,
            ))
            .await
            .unwrap();

        let replies = agenda(&fx.ctx(), &staff, 0).await.unwrap();
        assert!(replies[0].contains("Juan Pérez"));
        assert!(!replies[0].contains("Ana López"));
        assert!(!replies[0].contains("Pedro Gómez"));

        let replies = agenda(&fx.ctx(), &staff, 1).await.unwrap();
        assert!(replies[0].contains("Pedro Gómez"));
        assert!(replies[0].contains("mañana"));
    }
}
