//! Funnel transitions and their side effects
//!
//! The stage/score/category tables live on the core types; this module
//! owns what happens around a move: follow-up rescheduling, survey
//! kickoff on the terminal stages and the cross-notification to the
//! assigned staff member when somebody else moved their lead.

use chrono::{Duration, Utc};

use sales_agent_core::{FunnelStage, Lead, PendingAction, StaffMember};
use sales_agent_persistence::{OutboxTask, PersistenceLayer};
use sales_agent_tools::notify;

use crate::engine::enqueue_send;
use crate::survey::{self, SurveyTrack};
use crate::AgentError;

/// Who triggered a funnel move.
#[derive(Debug, Clone, Copy)]
pub enum Mover<'a> {
    Customer,
    Staff(&'a StaffMember),
}

/// A completed transition, for the caller's reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMove {
    pub from: FunnelStage,
    pub to: FunnelStage,
}

impl StageMove {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Applies funnel moves and their side effects, then persists the lead.
pub struct FunnelEngine {
    stores: PersistenceLayer,
}

impl FunnelEngine {
    pub fn new(stores: PersistenceLayer) -> Self {
        Self { stores }
    }

    /// Move a lead to a stage. Score and category are recomputed from the
    /// stage tables; prior score never matters. A no-op move (same stage)
    /// persists nothing and fires no side effects.
    pub async fn move_to(
        &self,
        lead: &mut Lead,
        to: FunnelStage,
        mover: Mover<'_>,
    ) -> Result<StageMove, AgentError> {
        let from = lead.status;
        if from == to {
            return Ok(StageMove { from, to });
        }

        lead.apply_stage(to);
        tracing::info!(
            phone = %lead.phone,
            from = %from,
            to = %to,
            score = lead.score,
            category = %lead.category,
            "Funnel move"
        );

        self.reschedule_follow_up(lead).await;

        match to {
            FunnelStage::Delivered => self.start_survey(lead, SurveyTrack::Delivered).await,
            FunnelStage::Fallen => self.start_survey(lead, SurveyTrack::Fallen).await,
            _ => {}
        }

        self.cross_notify(lead, from, to, mover).await?;
        self.stores.leads.upsert(lead).await?;

        Ok(StageMove { from, to })
    }

    /// Drop the stage-keyed nudge scheduled for the old stage and queue
    /// the one for the new stage, when the new stage has one.
    async fn reschedule_follow_up(&self, lead: &Lead) {
        if let Err(e) = self.stores.outbox.cancel_follow_ups(&lead.phone).await {
            tracing::warn!(phone = %lead.phone, error = %e, "Could not cancel follow-ups");
        }
        if let Some((delay, note)) = follow_up_plan(lead) {
            let task = OutboxTask::follow_up(&lead.phone, &note, Utc::now() + delay);
            if let Err(e) = self.stores.outbox.enqueue(&task).await {
                tracing::warn!(phone = %lead.phone, error = %e, "Could not queue follow-up");
            }
        }
    }

    async fn start_survey(&self, lead: &mut Lead, track: SurveyTrack) {
        lead.survey_step = track.gate_step();
        lead.broker_stage = None;
        lead.pending_action = PendingAction::None;
        enqueue_send(
            &self.stores.outbox,
            &lead.phone,
            &survey::gate_question(track, lead),
        )
        .await;
    }

    /// Tell the assigned staff member about a move they did not make.
    async fn cross_notify(
        &self,
        lead: &Lead,
        from: FunnelStage,
        to: FunnelStage,
        mover: Mover<'_>,
    ) -> Result<(), AgentError> {
        let Some(owner_id) = lead.assigned_staff_id else {
            return Ok(());
        };
        if let Mover::Staff(member) = mover {
            if member.id == owner_id {
                return Ok(());
            }
        }
        if let Some(owner) = self.stores.team.get(owner_id).await? {
            enqueue_send(
                &self.stores.outbox,
                &owner.phone,
                &notify::stage_change_for_staff(lead, from, to),
            )
            .await;
        }
        Ok(())
    }
}

/// Stage-keyed follow-up: how long to wait and what to say. Terminal
/// stages and `scheduled` get no nudge.
fn follow_up_plan(lead: &Lead) -> Option<(Duration, String)> {
    let first = lead.first_name();
    match lead.status {
        FunnelStage::New => Some((
            Duration::hours(24),
            format!(
                "Hola {first} 👋 Vi que nos escribiste. ¿Te gustaría agendar una \
                 visita para conocer nuestros desarrollos? 🏠"
            ),
        )),
        FunnelStage::Contacted => Some((
            Duration::hours(24),
            format!(
                "Hola {first} 👋 ¿Sigues buscando casa? Me encantaría ayudarte a \
                 encontrar la tuya 🏠"
            ),
        )),
        FunnelStage::Visited => Some((
            Duration::hours(24),
            format!("Hola {first} 👋 ¿Qué te pareció tu visita? Me encantaría saber tu opinión 😊"),
        )),
        FunnelStage::Negotiation => Some((
            Duration::hours(48),
            format!(
                "Hola {first} 👋 ¿Cómo vas con tu decisión? Cualquier duda sobre el \
                 proceso aquí estoy 🏠"
            ),
        )),
        FunnelStage::Reserved => Some((
            Duration::hours(72),
            format!(
                "Hola {first} 👋 ¿Cómo va todo con tu apartado? Si necesitas algo \
                 del papeleo, cuéntame 📋"
            ),
        )),
        _ => None,
    }
}
