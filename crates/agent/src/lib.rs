//! Conversation engine for the WhatsApp sales agent
//!
//! Features:
//! - Role routing: staff sub-routers by role keywords, customers to the funnel flow
//! - Ordered per-role staff command tables, first match wins
//! - Funnel state machine with table-derived score and category
//! - Multi-turn credit dialogue with advisor handoff
//! - Appointment scheduling with duplicate and business-hours guards
//! - Delivered/fallen exit surveys with referral capture
//!
//! Every inbound message is one stateless invocation: state lives in the
//! stores, outbound sends and calendar writes go through the outbox.

pub mod commands;
pub mod credit;
pub mod customer;
pub mod engine;
pub mod funnel;
pub mod scheduler;
pub mod survey;

pub use engine::{EngineConfig, HandleOutcome, SalesEngine};
pub use funnel::{FunnelEngine, Mover, StageMove};

use thiserror::Error;

/// Agent errors. Bad user input never becomes an error in this crate;
/// it becomes a reply. Only the stores can fail a handler.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] sales_agent_persistence::PersistenceError),
}
