//! ScyllaDB persistence layer for the sales agent
//!
//! Stores for:
//! - Leads and their funnel state
//! - Team members
//! - Conversation history (windowed reads)
//! - Appointments
//! - Credit applications
//! - The outbound task queue
//!
//! Every store is a trait with a ScyllaDB implementation and an
//! in-memory one for tests and single-node runs without a database.

pub mod appointments;
pub mod client;
pub mod credit;
pub mod error;
pub mod history;
pub mod leads;
pub mod outbox;
pub mod schema;
pub mod team;

pub use appointments::{AppointmentStore, InMemoryAppointmentStore, ScyllaAppointmentStore};
pub use client::{ScyllaClient, ScyllaConfig};
pub use credit::{CreditStore, InMemoryCreditStore, ScyllaCreditStore};
pub use error::PersistenceError;
pub use history::{HistoryStore, InMemoryHistoryStore, ScyllaHistoryStore};
pub use leads::{InMemoryLeadStore, LeadStore, ScyllaLeadStore};
pub use outbox::{
    InMemoryOutboxStore, OutboxStore, OutboxTask, ScyllaOutboxStore, TaskKind, TaskStatus,
};
pub use team::{InMemoryStaffStore, ScyllaStaffStore, StaffStore};

use std::sync::Arc;

/// Initialize the persistence layer against ScyllaDB
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        leads: Arc::new(ScyllaLeadStore::new(client.clone())),
        team: Arc::new(ScyllaStaffStore::new(client.clone())),
        history: Arc::new(ScyllaHistoryStore::new(client.clone())),
        appointments: Arc::new(ScyllaAppointmentStore::new(client.clone())),
        credit: Arc::new(ScyllaCreditStore::new(client.clone())),
        outbox: Arc::new(ScyllaOutboxStore::new(client)),
    })
}

/// Persistence layer backed by process memory only. State is lost on
/// restart; fine for tests and local runs.
pub fn init_in_memory() -> PersistenceLayer {
    PersistenceLayer {
        leads: Arc::new(InMemoryLeadStore::new()),
        team: Arc::new(InMemoryStaffStore::new()),
        history: Arc::new(InMemoryHistoryStore::new()),
        appointments: Arc::new(InMemoryAppointmentStore::new()),
        credit: Arc::new(InMemoryCreditStore::new()),
        outbox: Arc::new(InMemoryOutboxStore::new()),
    }
}

/// Combined persistence layer with all stores
#[derive(Clone)]
pub struct PersistenceLayer {
    pub leads: Arc<dyn LeadStore>,
    pub team: Arc<dyn StaffStore>,
    pub history: Arc<dyn HistoryStore>,
    pub appointments: Arc<dyn AppointmentStore>,
    pub credit: Arc<dyn CreditStore>,
    pub outbox: Arc<dyn OutboxStore>,
}
