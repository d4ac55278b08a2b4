//! Marketing commands: source counts and manual lead capture from
//! campaigns. Marketing only sees the leads its own channel produced.

use once_cell::sync::Lazy;
use regex::Regex;

use sales_agent_core::phone::{digits_only, last_ten};
use sales_agent_core::text::normalize;
use sales_agent_core::{Lead, StaffMember};
use sales_agent_tools::notify;

use crate::commands::{seller, CommandContext, CommandEntry, StaffCommand};
use crate::engine::enqueue_send;
use crate::scheduler;
use crate::AgentError;

pub(crate) const HELP: &str = "🤖 *Comandos disponibles*\n\n\
    📣 *fuentes* · leads por canal\n\
    🆕 *lead nuevo Juan Pérez 4921234567*\n\
    🔍 *buscar Juan* · solo leads de marketing";

pub(crate) static TABLE: &[CommandEntry] = &[
    CommandEntry { usage: "ayuda", parse: seller::parse_help },
    CommandEntry { usage: "fuentes", parse: parse_sources },
    CommandEntry { usage: "lead nuevo NOMBRE TELEFONO", parse: parse_register },
    CommandEntry { usage: "buscar NOMBRE", parse: seller::parse_search },
];

pub(crate) fn parse_sources(text: &str) -> Option<StaffCommand> {
    matches!(normalize(text).as_str(), "fuentes" | "mis fuentes").then_some(StaffCommand::Sources)
}

static REGISTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^lead\s+nuevo\s+(.+?)\s+(\+?\d[\d\s\-]{8,})\s*$").unwrap());

pub(crate) fn parse_register(text: &str) -> Option<StaffCommand> {
    let caps = REGISTER_RE.captures(text.trim())?;
    Some(StaffCommand::RegisterLead {
        name: caps.get(1)?.as_str().trim().to_string(),
        phone: caps.get(2)?.as_str().trim().to_string(),
    })
}

/// Lead tally per acquisition channel, busiest first.
pub(crate) async fn sources(ctx: &CommandContext<'_>) -> Result<Vec<String>, AgentError> {
    let leads = ctx.stores.leads.list_all(1000).await?;
    if leads.is_empty() {
        return Ok(vec!["Aún no hay leads registrados 📭".to_string()]);
    }

    let mut counts: Vec<(String, usize)> = Vec::new();
    for lead in &leads {
        match counts.iter_mut().find(|(source, _)| *source == lead.source) {
            Some((_, n)) => *n += 1,
            None => counts.push((lead.source.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let lines: Vec<String> = counts
        .iter()
        .map(|(source, n)| format!("▸ {source}: {n}"))
        .collect();
    Ok(vec![format!(
        "📣 *Leads por fuente* ({} total):\n\n{}",
        leads.len(),
        lines.join("\n"),
    )])
}

/// Capture a campaign lead by hand and route it to a seller.
pub(crate) async fn register_lead(
    ctx: &CommandContext<'_>,
    staff: &StaffMember,
    name: &str,
    phone_raw: &str,
) -> Result<Vec<String>, AgentError> {
    let digits = digits_only(phone_raw);
    if digits.len() < 10 {
        return Ok(vec![
            "El teléfono debe tener al menos 10 dígitos 🤔".to_string()
        ]);
    }
    if let Some(existing) = ctx.stores.leads.get(&digits).await? {
        return Ok(vec![format!(
            "Ese número ya está registrado como *{}* ({})",
            notify::lead_display_name(&existing),
            existing.status.label_es(),
        )]);
    }

    let mut lead = Lead::new(&digits, "marketing");
    lead.name = Some(name.to_string());
    if let Some(seller) = scheduler::resolve_seller(ctx.stores, &lead, ctx.today).await? {
        lead.assigned_staff_id = Some(seller.id);
        let referrer = format!("Marketing ({})", staff.first_name());
        enqueue_send(
            &ctx.stores.outbox,
            &seller.phone,
            &notify::referral_for_staff(name, &digits, &referrer),
        )
        .await;
    }
    ctx.stores.leads.upsert(&lead).await?;
    tracing::info!(phone = %digits, "Lead registered from marketing");

    Ok(vec![format!(
        "✅ Lead registrado: *{name}* ({}) 🎉",
        last_ten(&digits),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{find_lead, parse_with, LeadMatch};
    use crate::funnel::FunnelEngine;
    use chrono::{Duration, NaiveDate, Utc};
    use sales_agent_config::DomainConfig;
    use sales_agent_persistence::{init_in_memory, PersistenceLayer, TaskKind};

    fn parsed(text: &str) -> Option<StaffCommand> {
        parse_with(TABLE, text).map(|(_, cmd)| cmd)
    }

    #[test]
    fn fuentes_parses() {
        assert_eq!(parsed("fuentes"), Some(StaffCommand::Sources));
        assert_eq!(parsed("Mis fuentes"), Some(StaffCommand::Sources));
    }

    #[test]
    fn lead_nuevo_splits_name_and_phone() {
        assert_eq!(
            parsed("lead nuevo Juan Pérez 492 123 4567"),
            Some(StaffCommand::RegisterLead {
                name: "Juan Pérez".to_string(),
                phone: "492 123 4567".to_string(),
            })
        );
    }

    #[test]
    fn lead_nuevo_needs_a_real_number() {
        assert_eq!(parsed("lead nuevo Juan 12345"), None);
    }

    #[test]
    fn buscar_is_reachable_for_marketing() {
        assert_eq!(
            parsed("buscar Juan"),
            Some(StaffCommand::Search {
                name: "Juan".to_string()
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

    fn marketer() -> StaffMember {
        StaffMember::new("Nora Campos", "5214921110007", "Agencia de marketing")
    }

    fn lead_from(source: &str, phone: &str) -> Lead {
        Lead::new(phone, source)
    }

    #[tokio::test]
    async fn sources_counts_by_channel_busiest_first() {
        let fx = Fixture::new();
        fx.stores
            .leads
            .upsert(&lead_from("whatsapp", "4929110011"))
            .await
            .unwrap();
        fx.stores
            .leads
            .upsert(&lead_from("whatsapp", "4929110022"))
            .await
            .unwrap();
        fx.stores
            .leads
            .upsert(&lead_from("facebook", "4929110033"))
            .await
            .unwrap();

        let replies = sources(&fx.ctx()).await.unwrap();
        assert!(replies[0].contains("(3 total)"));
        let whatsapp = replies[0].find("▸ whatsapp: 2").unwrap();
        let facebook = replies[0].find("▸ facebook: 1").unwrap();
        assert!(whatsapp < facebook);
    }

    #[tokio::test]
    async fn registering_routes_the_lead_to_a_seller() {
        let fx = Fixture::new();
        let staff = marketer();
        let pedro = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        fx.stores.team.upsert(&pedro).await.unwrap();

        let replies = register_lead(&fx.ctx(), &staff, "Juan Pérez", "4921234567")
            .await
            .unwrap();
        assert!(replies[0].contains("Lead registrado"));
        assert!(replies[0].contains("4921234567"));

        let stored = fx.stores.leads.get("4921234567").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Juan Pérez"));
        assert_eq!(stored.source, "marketing");
        assert_eq!(stored.assigned_staff_id, Some(pedro.id));

        let pings = fx.sends_to(&pedro.phone).await;
        assert_eq!(pings.len(), 1);
        assert!(pings[0].contains("NUEVO LEAD REFERIDO"));
        assert!(pings[0].contains("Marketing (Nora)"));
    }

    #[tokio::test]
    async fn duplicate_numbers_are_reported_not_overwritten() {
        let fx = Fixture::new();
        let staff = marketer();
        let mut existing = lead_from("whatsapp", "4921234567");
        existing.name = Some("Ana López".to_string());
        fx.stores.leads.upsert(&existing).await.unwrap();

        let replies = register_lead(&fx.ctx(), &staff, "Otra Persona", "492-123-4567")
            .await
            .unwrap();
        assert!(replies[0].contains("ya está registrado como *Ana López*"));

        let stored = fx.stores.leads.get("4921234567").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Ana López"));
        assert_eq!(stored.source, "whatsapp");
    }

    #[tokio::test]
    async fn short_numbers_are_rejected() {
        let fx = Fixture::new();
        let staff = marketer();
        let replies = register_lead(&fx.ctx(), &staff, "Juan", "492123")
            .await
            .unwrap();
        assert!(replies[0].contains("al menos 10 dígitos"));
        assert!(fx.stores.leads.list_all(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_only_reaches_marketing_leads() {
        let fx = Fixture::new();
        let staff = marketer();

        let mut organic = lead_from("whatsapp", "4929110011");
        organic.name = Some("Juan Rivas".to_string());
        let mut campaign = lead_from("marketing", "4929110022");
        campaign.name = Some("Juan Solís".to_string());
        fx.stores.leads.upsert(&organic).await.unwrap();
        fx.stores.leads.upsert(&campaign).await.unwrap();

        match find_lead(&fx.ctx(), &staff, "Juan").await.unwrap() {
            LeadMatch::One(found) => assert_eq!(found.source, "marketing"),
            other => panic!("expected one marketing lead, got {other:?}"),
        }
    }
}
