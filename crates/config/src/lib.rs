//! Configuration management for the sales agent
//!
//! Supports loading configuration from:
//! - YAML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (SALES_AGENT_ prefix)
//!
//! Two layers are kept separate on purpose:
//! - [`Settings`] - deployment concerns: server, transport credentials,
//!   backend, persistence
//! - [`DomainConfig`] - the business catalog: developments, models,
//!   prices, banks, hours (config/domain.yaml)

pub mod domain;
pub mod settings;

pub use domain::{
    BankEntry, BusinessHours, CompanyInfo, DevelopmentConfig, DomainConfig, PriceRange,
    PropertyModel, UNDECIDED_BANK, UNDECIDED_PROPERTY,
};
pub use settings::{
    load_settings, AgentConfig, CalendarConfig, LlmSettings, ObservabilityConfig, OutboxConfig,
    PersistenceConfig, RateLimitConfig, RuntimeEnvironment, ServerConfig, Settings, WhatsAppConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
