//! Credit advisor commands: the mortgage pipeline and application
//! status updates. Advisors only reach leads behind their own
//! applications, plus unclaimed ones, which they claim on first touch.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use sales_agent_core::text::{format_money, normalize};
use sales_agent_core::{CreditStatus, StaffMember};
use sales_agent_tools::notify;

use crate::commands::{
    disambiguation_reply, find_lead, not_found_reply, seller, CommandContext, CommandEntry,
    LeadMatch, StaffCommand,
};
use crate::engine::enqueue_send;
use crate::AgentError;

pub(crate) const HELP: &str = "🤖 *Comandos disponibles*\n\n\
    💼 *mis créditos* · tu pipeline\n\
    ✅ *aprobado Juan*\n\
    🔎 *en revisión Juan*\n\
    🏦 *banco Juan* · enviado al banco\n\
    🔁 *rechazado on Juan* · puede reintentar\n\
    ⛔ *rechazado off Juan* · rechazo definitivo\n\
    🕐 *mis citas* / *citas mañana*";

/// `rechazado on` and `rechazado off` must sit above the bare
/// `rechazado`, which would otherwise read "on Juan" as a name.
pub(crate) static TABLE: &[CommandEntry] = &[
    CommandEntry { usage: "ayuda", parse: seller::parse_help },
    CommandEntry { usage: "mis creditos", parse: parse_pipeline },
    CommandEntry { usage: "mis citas / citas manana", parse: seller::parse_agenda },
    CommandEntry { usage: "aprobado NOMBRE", parse: parse_approved },
    CommandEntry { usage: "en revision NOMBRE", parse: parse_in_review },
    CommandEntry { usage: "banco NOMBRE", parse: parse_sent_to_bank },
    CommandEntry { usage: "rechazado on NOMBRE", parse: parse_rejected_on },
    CommandEntry { usage: "rechazado off NOMBRE", parse: parse_rejected_off },
    CommandEntry { usage: "rechazado NOMBRE", parse: parse_rejected },
];

pub(crate) fn parse_pipeline(text: &str) -> Option<StaffCommand> {
    matches!(
        normalize(text).as_str(),
        "mis creditos" | "mi pipeline" | "pipeline"
    )
    .then_some(StaffCommand::CreditPipeline)
}

static APPROVED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^aprobado\s+(.+)$").unwrap());

pub(crate) fn parse_approved(text: &str) -> Option<StaffCommand> {
    let caps = APPROVED_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::Approved,
    })
}

static IN_REVIEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^en\s+revisi[oó]n\s+(.+)$").unwrap());

pub(crate) fn parse_in_review(text: &str) -> Option<StaffCommand> {
    let caps = IN_REVIEW_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::InReview,
    })
}

static SENT_TO_BANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^banco\s+(.+)$").unwrap());

pub(crate) fn parse_sent_to_bank(text: &str) -> Option<StaffCommand> {
    let caps = SENT_TO_BANK_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::SentToBank,
    })
}

static REJECTED_ON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^rechazado\s+on\s+(.+)$").unwrap());

pub(crate) fn parse_rejected_on(text: &str) -> Option<StaffCommand> {
    let caps = REJECTED_ON_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::RejectedOn,
    })
}

static REJECTED_OFF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^rechazado\s+off\s+(.+)$").unwrap());

pub(crate) fn parse_rejected_off(text: &str) -> Option<StaffCommand> {
    let caps = REJECTED_OFF_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::RejectedOff,
    })
}

static REJECTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^rechazado\s+(.+)$").unwrap());

/// Bare "rechazado NOMBRE" defaults to the retryable rejection.
pub(crate) fn parse_rejected(text: &str) -> Option<StaffCommand> {
    let caps = REJECTED_RE.captures(text.trim())?;
    Some(StaffCommand::CreditUpdate {
        name: caps.get(1)?.as_str().trim().to_string(),
        status: CreditStatus::RejectedOn,
    })
}

pub(crate) async fn pipeline(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
) -> Result<Vec<String>, AgentError> {
    let mut apps: Vec<_> = ctx
        .stores
        .credit
        .list_all(1000)
        .await?
        .into_iter()
        .filter(|a| a.status.is_open())
        .filter(|a| a.advisor_id == Some(staff.id) || a.advisor_id.is_none())
        .collect();
    if apps.is_empty() {
        return Ok(vec!["No tienes créditos activos en tu pipeline 📭".to_string()]);
    }
    apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let leads = ctx.stores.leads.list_all(500).await?;
    let lines: Vec<String> = apps
        .iter()
        .map(|app| {
            let name = leads
                .iter()
                .find(|l| l.id == app.lead_id)
                .map(notify::lead_display_name)
                .unwrap_or_else(|| "Cliente".to_string());
            format!(
                "🏦 {} · {} · {} · {}",
                name,
                app.bank,
                app.status.label_es(),
                format_money(app.requested_amount),
            )
        })
        .collect();
    Ok(vec![format!(
        "💼 *Tu pipeline hipotecario* ({}):\n\n{}",
        lines.len(),
        lines.join("\n"),
    )])
}

/// Apply a status to the lead's newest open application. The first
/// advisor to touch an unclaimed application becomes its advisor.
pub(crate) async fn update_status(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
    status: CreditStatus,
) -> Result<Vec<String>, AgentError> {
    let lead = match find_lead(ctx, staff, name).await? {
        LeadMatch::One(lead) => lead,
        LeadMatch::Many(hits) => return Ok(vec![disambiguation_reply(&hits)]),
        LeadMatch::None => return Ok(vec![not_found_reply(staff, name)]),
    };
    let shown = notify::lead_display_name(&lead);

    let mut apps = ctx.stores.credit.list_for_lead(lead.id).await?;
    apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let Some(mut app) = apps.into_iter().find(|a| a.status.is_open()) else {
        return Ok(vec![format!(
            "*{shown}* no tiene solicitudes de crédito abiertas 🤔"
        )]);
    };

    app.status = status;
    app.updated_at = Utc::now();
    if app.advisor_id.is_none() {
        app.advisor_id = Some(staff.id);
    }
    ctx.stores.credit.upsert(&app).await?;
    tracing::info!(
        lead = %lead.phone,
        bank = %app.bank,
        status = %status.as_str(),
        "Credit application updated"
    );

    // The assigned seller hears about final outcomes.
    let decided = matches!(status, CreditStatus::Approved | CreditStatus::RejectedOff);
    if decided {
        if let Some(owner_id) = lead.assigned_staff_id {
            if owner_id != staff.id {
                if let Some(owner) = ctx.stores.team.get(owner_id).await? {
                    let approved = status == CreditStatus::Approved;
                    enqueue_send(
                        &ctx.stores.outbox,
                        &owner.phone,
                        &notify::credit_result_for_seller(&lead, &app.bank, approved),
                    )
                    .await;
                }
            }
        }
    }

    Ok(vec![format!("✅ Crédito de *{shown}*: {}", status.label_es())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::parse_with;
    use crate::funnel::FunnelEngine;
    use chrono::{Duration, NaiveDate, Utc};
    use sales_agent_config::DomainConfig;
    use sales_agent_core::{CreditApplication, Lead};
    use sales_agent_persistence::{init_in_memory, PersistenceLayer, TaskKind};

    fn parsed(text: &str) -> Option<StaffCommand> {
        parse_with(TABLE, text).map(|(_, cmd)| cmd)
    }

    #[test]
    fn pipeline_forms_parse() {
        assert_eq!(parsed("mis créditos"), Some(StaffCommand::CreditPipeline));
        assert_eq!(parsed("mi pipeline"), Some(StaffCommand::CreditPipeline));
        assert_eq!(parsed("pipeline"), Some(StaffCommand::CreditPipeline));
    }

    #[test]
    fn aprobado_parses() {
        assert_eq!(
            parsed("aprobado Juan Pérez"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan Pérez".to_string(),
                status: CreditStatus::Approved
            })
        );
    }

    #[test]
    fn en_revision_parses_with_and_without_accent() {
        assert_eq!(
            parsed("en revisión Juan"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan".to_string(),
                status: CreditStatus::InReview
            })
        );
        assert_eq!(
            parsed("en revision Ana"),
            Some(StaffCommand::CreditUpdate {
                name: "Ana".to_string(),
                status: CreditStatus::InReview
            })
        );
    }

    #[test]
    fn banco_parses_as_sent_to_bank() {
        assert_eq!(
            parsed("banco Juan"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan".to_string(),
                status: CreditStatus::SentToBank
            })
        );
    }

    #[test]
    fn rechazado_on_wins_over_bare_rechazado() {
        assert_eq!(
            parsed("rechazado on Juan"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan".to_string(),
                status: CreditStatus::RejectedOn
            })
        );
    }

    #[test]
    fn rechazado_off_parses() {
        assert_eq!(
            parsed("rechazado off Juan"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan".to_string(),
                status: CreditStatus::RejectedOff
            })
        );
    }

    #[test]
    fn bare_rechazado_defaults_to_retryable() {
        assert_eq!(
            parsed("rechazado Juan"),
            Some(StaffCommand::CreditUpdate {
                name: "Juan".to_string(),
                status: CreditStatus::RejectedOn
            })
        );
    }

    #[test]
    fn agenda_is_reachable_for_advisors() {
        assert_eq!(
            parsed("citas mañana"),
            Some(StaffCommand::Agenda { day_offset: 1 })
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
                today: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            }
        }

        async fn sends_to(&self, phone: &str) -> Vec<String> {
            self.stores
                .outbox
                .due(Utc::now() + Duration::days(1), 100)
                .await
                .unwrap()
                .into_iter()
                .filter(|t| t.kind == TaskKind::SendMessage && t.payload["to"] == phone)
                .map(|t| t.payload["body"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    fn advisor() -> StaffMember {
        StaffMember::new("Laura Díaz", "5214921110009", "Asesor hipotecario")
    }

    fn lead_named(name: &str, phone: &str) -> Lead {
        let mut lead = Lead::new(phone, "whatsapp");
        lead.name = Some(name.to_string());
        lead
    }

    #[tokio::test]
    async fn pipeline_lists_open_applications_with_lead_names() {
        let fx = Fixture::new();
        let staff = advisor();

        let juan = lead_named("Juan Pérez", "4929110022");
        let ana = lead_named("Ana López", "4929110033");
        fx.stores.leads.upsert(&juan).await.unwrap();
        fx.stores.leads.upsert(&ana).await.unwrap();

        let mut open = CreditApplication::new(juan.id, "BBVA", 30_000, 100_000);
        open.advisor_id = Some(staff.id);
        let mut closed = CreditApplication::new(ana.id, "Banorte", 20_000, 0);
        closed.advisor_id = Some(staff.id);
        closed.status = CreditStatus::Approved;
        fx.stores.credit.upsert(&open).await.unwrap();
        fx.stores.credit.upsert(&closed).await.unwrap();

        let replies = pipeline(&fx.ctx(), &staff).await.unwrap();
        assert!(replies[0].contains("(1)"));
        assert!(replies[0].contains("Juan Pérez"));
        assert!(replies[0].contains("BBVA"));
        assert!(replies[0].contains("$2,400,000"));
        assert!(!replies[0].contains("Ana López"));
    }

    #[tokio::test]
    async fn approval_updates_the_app_and_tells_the_seller() {
        let fx = Fixture::new();
        let staff = advisor();
        let seller = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        fx.stores.team.upsert(&seller).await.unwrap();

        let mut lead = lead_named("Juan Pérez", "4929110022");
        lead.assigned_staff_id = Some(seller.id);
        fx.stores.leads.upsert(&lead).await.unwrap();

        let mut app = CreditApplication::new(lead.id, "BBVA", 30_000, 100_000);
        app.advisor_id = Some(staff.id);
        fx.stores.credit.upsert(&app).await.unwrap();

        let replies = update_status(&fx.ctx(), &staff, "Juan", CreditStatus::Approved)
            .await
            .unwrap();
        assert!(replies[0].contains("Aprobado"));

        let stored = fx.stores.credit.get(lead.id, app.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CreditStatus::Approved);

        let to_seller = fx.sends_to(&seller.phone).await;
        assert_eq!(to_seller.len(), 1);
        assert!(to_seller[0].contains("CRÉDITO APROBADO"));
        assert!(to_seller[0].contains("BBVA"));
    }

    #[tokio::test]
    async fn in_review_stays_quiet_toward_the_seller() {
        let fx = Fixture::new();
        let staff = advisor();
        let seller = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        fx.stores.team.upsert(&seller).await.unwrap();

        let mut lead = lead_named("Juan Pérez", "4929110022");
        lead.assigned_staff_id = Some(seller.id);
        fx.stores.leads.upsert(&lead).await.unwrap();
        let mut app = CreditApplication::new(lead.id, "BBVA", 30_000, 0);
        app.advisor_id = Some(staff.id);
        fx.stores.credit.upsert(&app).await.unwrap();

        update_status(&fx.ctx(), &staff, "Juan", CreditStatus::InReview)
            .await
            .unwrap();

        assert!(fx.sends_to(&seller.phone).await.is_empty());
        let stored = fx.stores.credit.get(lead.id, app.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CreditStatus::InReview);
    }

    #[tokio::test]
    async fn touching_an_unclaimed_application_claims_it() {
        let fx = Fixture::new();
        let staff = advisor();

        let lead = lead_named("Juan Pérez", "4929110022");
        fx.stores.leads.upsert(&lead).await.unwrap();
        let app = CreditApplication::new(lead.id, "HSBC", 25_000, 50_000);
        fx.stores.credit.upsert(&app).await.unwrap();

        update_status(&fx.ctx(), &staff, "Juan", CreditStatus::InReview)
            .await
            .unwrap();

        let stored = fx.stores.credit.get(lead.id, app.id).await.unwrap().unwrap();
        assert_eq!(stored.advisor_id, Some(staff.id));
    }

    #[tokio::test]
    async fn another_advisors_lead_is_out_of_scope() {
        let fx = Fixture::new();
        let staff = advisor();
        let rival = StaffMember::new("Marco Vela", "5214921110008", "Asesor hipotecario");

        let lead = lead_named("Juan Pérez", "4929110022");
        fx.stores.leads.upsert(&lead).await.unwrap();
        let mut app = CreditApplication::new(lead.id, "BBVA", 30_000, 0);
        app.advisor_id = Some(rival.id);
        fx.stores.credit.upsert(&app).await.unwrap();

        let replies = update_status(&fx.ctx(), &staff, "Juan", CreditStatus::Approved)
            .await
            .unwrap();
        assert!(replies[0].contains("No encontré"));

        let stored = fx.stores.credit.get(lead.id, app.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CreditStatus::Pending);
    }

    #[tokio::test]
    async fn lead_without_open_apps_reports_it() {
        let fx = Fixture::new();
        let staff = advisor();

        let lead = lead_named("Juan Pérez", "4929110022");
        fx.stores.leads.upsert(&lead).await.unwrap();
        let mut app = CreditApplication::new(lead.id, "BBVA", 30_000, 0);
        app.advisor_id = Some(staff.id);
        app.status = CreditStatus::Approved;
        fx.stores.credit.upsert(&app).await.unwrap();

        let replies = update_status(&fx.ctx(), &staff, "Juan", CreditStatus::InReview)
            .await
            .unwrap();
        assert!(replies[0].contains("no tiene solicitudes de crédito abiertas"));
    }
}
