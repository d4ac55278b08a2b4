//! Top-level inbound router
//!
//! One entry point per webhook message: drop transport noise and echoes
//! from the business's own numbers, send team phones to the command
//! router, everyone else through the customer flow. Handling never
//! errors toward the transport; failures queue an apology to the sender
//! and report [`HandleOutcome::Failed`].

use std::sync::Arc;

use sales_agent_config::{DomainConfig, Settings};
use sales_agent_core::dates::local_today;
use sales_agent_core::phone::{last_ten, same_number};
use sales_agent_core::{IncomingMessage, StaffMember};
use sales_agent_llm::{CompletionBackend, IntentClassifier};
use sales_agent_persistence::{OutboxStore, OutboxTask, PersistenceLayer};

use crate::commands::{self, CommandContext};
use crate::customer;
use crate::funnel::FunnelEngine;
use crate::AgentError;

const APOLOGY: &str = "Disculpa, tuve un problema técnico. ¿Puedes repetir tu mensaje? 🙏";

/// Engine knobs lifted out of [`Settings`] at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Business local time as a fixed UTC offset.
    pub utc_offset_hours: i32,
    /// Numbers the business sends from; inbound traffic from them is an
    /// echo and gets dropped.
    pub own_numbers: Vec<String>,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut own_numbers = settings.whatsapp.own_numbers.clone();
        if !settings.whatsapp.from_number.is_empty() {
            own_numbers.push(settings.whatsapp.from_number.clone());
        }
        Self {
            utc_offset_hours: settings.agent.utc_offset_hours,
            own_numbers,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: -6,
            own_numbers: Vec::new(),
        }
    }
}

/// Where one inbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Transport artifact, dropped without side effects.
    Noise,
    /// Echo from one of the business's own numbers, dropped.
    OwnNumber,
    /// Handled by a staff command table.
    Staff,
    /// Handled by the customer flow.
    Customer,
    /// Handling failed; an apology was queued for the sender.
    Failed,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Noise => "noise",
            HandleOutcome::OwnNumber => "own_number",
            HandleOutcome::Staff => "staff",
            HandleOutcome::Customer => "customer",
            HandleOutcome::Failed => "failed",
        }
    }
}

/// The conversation engine. Stateless per message; everything durable
/// lives in the stores, so one instance serves all phones concurrently.
pub struct SalesEngine {
    stores: PersistenceLayer,
    domain: DomainConfig,
    config: EngineConfig,
    classifier: IntentClassifier,
    backend: Option<Arc<dyn CompletionBackend>>,
    funnel: FunnelEngine,
}

impl SalesEngine {
    pub fn new(
        stores: PersistenceLayer,
        domain: DomainConfig,
        config: EngineConfig,
        backend: Option<Arc<dyn CompletionBackend>>,
    ) -> Self {
        let classifier = IntentClassifier::new(backend.clone());
        let funnel = FunnelEngine::new(stores.clone());
        Self {
            stores,
            domain,
            config,
            classifier,
            backend,
            funnel,
        }
    }

    pub fn stores(&self) -> &PersistenceLayer {
        &self.stores
    }

    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    /// Whether a completion backend is wired in for intent classification.
    pub fn classifier_enabled(&self) -> bool {
        self.classifier.is_enabled()
    }

    /// Handle one webhook message end to end. The transport always gets
    /// its 200, so this never returns an error; what went wrong is in
    /// the logs and the outcome.
    pub async fn handle_incoming_message(&self, msg: &IncomingMessage) -> HandleOutcome {
        let outcome = if msg.is_transport_noise() {
            tracing::debug!(from = %msg.from, "Dropped transport noise");
            HandleOutcome::Noise
        } else if self.is_own_number(&msg.from) {
            tracing::debug!(from = %msg.from, "Dropped echo from own number");
            HandleOutcome::OwnNumber
        } else {
            match self.route(msg).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(from = %msg.from, error = %e, "Message handling failed");
                    enqueue_send(&self.stores.outbox, &msg.phone_digits(), APOLOGY).await;
                    HandleOutcome::Failed
                }
            }
        };
        metrics::counter!("sales_agent_messages_total", "route" => outcome.as_str()).increment(1);
        outcome
    }

    async fn route(&self, msg: &IncomingMessage) -> Result<HandleOutcome, AgentError> {
        let phone = msg.phone_digits();

        if let Some(mut staff) = self.resolve_staff(&phone).await? {
            // A staff phone must never carry a customer record; one can
            // appear when a member texts before being registered.
            if self.stores.leads.get(&phone).await?.is_some() {
                self.stores.leads.delete(&phone).await?;
                tracing::info!(phone = %phone, "Deleted phantom lead on a staff phone");
            }
            let ctx = CommandContext {
                stores: &self.stores,
                domain: &self.domain,
                funnel: &self.funnel,
                backend: self.backend.clone(),
                today: local_today(self.config.utc_offset_hours),
            };
            commands::handle_staff_message(&ctx, &mut staff, &msg.body).await?;
            return Ok(HandleOutcome::Staff);
        }

        customer::handle(
            &self.stores,
            &self.domain,
            &self.classifier,
            &self.funnel,
            msg,
            self.config.utc_offset_hours,
        )
        .await?;
        Ok(HandleOutcome::Customer)
    }

    async fn resolve_staff(&self, phone: &str) -> Result<Option<StaffMember>, AgentError> {
        let team = self.stores.team.list_all().await?;
        Ok(team
            .into_iter()
            .filter(|m| m.active)
            .find(|m| last_ten(&m.phone) == phone))
    }

    fn is_own_number(&self, from: &str) -> bool {
        self.config
            .own_numbers
            .iter()
            .any(|own| same_number(own, from))
    }
}

/// Queue an outbound WhatsApp message. Fire and forget: a failed
/// enqueue is logged, never surfaced into the conversation.
pub(crate) async fn enqueue_send(outbox: &Arc<dyn OutboxStore>, to: &str, body: &str) {
    let task = OutboxTask::send_message(to, body);
    if let Err(e) = outbox.enqueue(&task).await {
        tracing::error!(to = %to, error = %e, "Failed to enqueue outbound message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use sales_agent_persistence::{init_in_memory, TaskKind};

    fn engine() -> SalesEngine {
        engine_with(EngineConfig::default())
    }

    fn engine_with(config: EngineConfig) -> SalesEngine {
        SalesEngine::new(init_in_memory(), DomainConfig::default(), config, None)
    }

    async fn sends_to(engine: &SalesEngine, phone: &str) -> Vec<String> {
        engine
            .stores
            .outbox
            .due(Utc::now() + Duration::days(1), 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TaskKind::SendMessage && t.payload["to"] == phone)
            .map(|t| t.payload["body"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn status_callbacks_are_dropped() {
        let engine = engine();
        let msg = IncomingMessage::new("whatsapp:+5214921234567", "delivered");

        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::Noise);
        assert!(engine.stores.leads.list_all(10).await.unwrap().is_empty());
        assert!(engine
            .stores
            .outbox
            .due(Utc::now() + Duration::days(1), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn own_number_echoes_are_dropped() {
        let engine = engine_with(EngineConfig {
            utc_offset_hours: -6,
            own_numbers: vec!["whatsapp:+5214920000000".to_string()],
        });
        let msg = IncomingMessage::new("whatsapp:+5214920000000", "Hola, busco casa");

        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::OwnNumber);
        assert!(engine.stores.leads.list_all(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn from_settings_treats_the_sender_number_as_own() {
        let config = EngineConfig::from_settings(&Settings::default());
        assert!(config.own_numbers.iter().any(|n| n.contains("1415523")));
        assert_eq!(config.utc_offset_hours, -6);
    }

    #[tokio::test]
    async fn team_phones_land_in_the_command_router() {
        let engine = engine();
        let pedro = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        engine.stores.team.upsert(&pedro).await.unwrap();

        let msg = IncomingMessage::new("whatsapp:+5214921110001", "ayuda");
        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::Staff);
        let replies = sends_to(&engine, &pedro.phone).await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("Comandos disponibles"));
        // No customer record must exist for the staff phone.
        assert!(engine.stores.leads.get("4921110001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_phones_become_customers() {
        let engine = engine();
        let msg = IncomingMessage::new("whatsapp:+5214921234567", "Hola");

        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::Customer);
        let lead = engine.stores.leads.get("4921234567").await.unwrap();
        assert!(lead.is_some());
    }

    #[tokio::test]
    async fn phantom_lead_on_a_staff_phone_is_deleted() {
        let engine = engine();
        let pedro = StaffMember::new("Pedro Ruiz", "5214921110001", "Vendedor");
        engine.stores.team.upsert(&pedro).await.unwrap();
        // The record a premature customer turn would have left behind.
        let phantom = sales_agent_core::Lead::new("4921110001", "whatsapp");
        engine.stores.leads.upsert(&phantom).await.unwrap();

        let msg = IncomingMessage::new("whatsapp:+5214921110001", "mis leads");
        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::Staff);
        assert!(engine.stores.leads.get("4921110001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_members_are_treated_as_customers() {
        let engine = engine();
        let mut gone = StaffMember::new("Ex Vendedor", "5214921110003", "Vendedor");
        gone.active = false;
        engine.stores.team.upsert(&gone).await.unwrap();

        let msg = IncomingMessage::new("whatsapp:+5214921110003", "Hola");
        let outcome = engine.handle_incoming_message(&msg).await;

        assert_eq!(outcome, HandleOutcome::Customer);
    }
}
