//! External side effects for the sales agent
//!
//! Everything that leaves the process lives here:
//! - [`gateway`] - outbound WhatsApp (Twilio or simulated)
//! - [`calendar`] - site-visit events on the sales calendar
//! - [`notify`] - the Spanish notification texts staff and customers get
//! - [`outbox`] - the worker that drains queued side effects with retry
//!
//! The engine never calls Twilio or the calendar inline; it enqueues
//! outbox tasks next to its store writes and this crate delivers them.

pub mod calendar;
pub mod gateway;
pub mod notify;
pub mod outbox;

pub use calendar::{CalendarEvent, CalendarService, StubCalendar};
pub use gateway::{build_gateway, MessageGateway, SentMessage, SimulatedGateway, TwilioGateway};
pub use outbox::OutboxWorker;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Calendar error: {0}")]
    Calendar(String),

    #[error("Malformed task: {0}")]
    Task(String),

    #[error("Store error: {0}")]
    Store(#[from] sales_agent_persistence::PersistenceError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ToolsError {
    /// Whether the outbox worker should schedule another attempt.
    /// Malformed tasks and bad configuration never heal on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolsError::Gateway(_) | ToolsError::Calendar(_) | ToolsError::Store(_)
        )
    }
}

impl From<reqwest::Error> for ToolsError {
    fn from(err: reqwest::Error) -> Self {
        ToolsError::Gateway(err.to_string())
    }
}
