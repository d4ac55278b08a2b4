//! Core domain types for the WhatsApp sales agent
//!
//! This crate provides the foundational types used across all other crates:
//! - Lead records, funnel stages and the derived score/category tables
//! - Staff members and role resolution
//! - Appointments and credit applications
//! - The typed `PendingAction` / `BrokerStage` state enums
//! - Spanish-language parsing: amounts, dates/times, yes/no, names
//! - Phone-number normalization and transport-noise detection

pub mod appointment;
pub mod conversation;
pub mod credit;
pub mod dates;
pub mod lead;
pub mod message;
pub mod phone;
pub mod staff;
pub mod text;

pub use appointment::{Appointment, AppointmentKind, AppointmentStatus};
pub use conversation::{ChatTurn, TurnRole};
pub use credit::{BrokerStage, CreditApplication, CreditStatus, DocChecklist};
pub use lead::{
    ConfirmableAction, ContactModality, FunnelStage, Lead, LeadCategory, PendingAction,
};
pub use message::IncomingMessage;
pub use staff::{StaffMember, StaffRole};
