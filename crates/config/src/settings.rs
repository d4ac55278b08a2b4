//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Completion backend configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// WhatsApp transport configuration
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Calendar integration configuration
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Engine behavior knobs
    #[serde(default)]
    pub agent: AgentConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Persistence configuration (ScyllaDB)
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Path to the business catalog file (YAML)
    #[serde(default = "default_domain_config_path")]
    pub domain_config_path: String,
}

fn default_domain_config_path() -> String {
    "config/domain.yaml".to_string()
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_llm()?;
        self.validate_whatsapp()?;
        self.validate_agent()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        let rate_limit = &server.rate_limit;
        if rate_limit.enabled {
            if rate_limit.messages_per_minute == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.messages_per_minute".to_string(),
                    message: "Must be at least 1 when rate limiting is enabled".to_string(),
                });
            }
            if rate_limit.burst_multiplier < 1.0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.burst_multiplier".to_string(),
                    message: format!("Must be at least 1.0, got {}", rate_limit.burst_multiplier),
                });
            }
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;

        if llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.max_tokens".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", llm.temperature),
            });
        }
        if llm.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_seconds".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        if llm.enabled && llm.api_key.is_none() {
            if self.environment.is_strict() {
                return Err(ConfigError::InvalidValue {
                    field: "llm.api_key".to_string(),
                    message: "API key must be set when the backend is enabled in production"
                        .to_string(),
                });
            }
            tracing::warn!("llm.api_key not set; classifier will fall back to keyword heuristics");
        }

        Ok(())
    }

    fn validate_whatsapp(&self) -> Result<(), ConfigError> {
        let whatsapp = &self.whatsapp;

        if whatsapp.enabled {
            if whatsapp.account_sid.is_none() || whatsapp.auth_token.is_none() {
                if self.environment.is_strict() {
                    return Err(ConfigError::InvalidValue {
                        field: "whatsapp.account_sid".to_string(),
                        message: "Account SID and auth token are required when the transport \
                                  is enabled"
                            .to_string(),
                    });
                }
                tracing::warn!("whatsapp credentials missing; outbound sends will fail");
            }
            if whatsapp.from_number.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "whatsapp.from_number".to_string(),
                    message: "From number is required when the transport is enabled".to_string(),
                });
            }
        }

        Ok(())
    }

    fn validate_agent(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;

        if !(-12..=14).contains(&agent.utc_offset_hours) {
            return Err(ConfigError::InvalidValue {
                field: "agent.utc_offset_hours".to_string(),
                message: format!("Must be between -12 and 14, got {}", agent.utc_offset_hours),
            });
        }
        if agent.appointment_dedup_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.appointment_dedup_minutes".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if agent.outbox.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.outbox.max_attempts".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Bearer token for the admin endpoints; unset leaves them open
    /// (set via SALES_AGENT__SERVER__ADMIN_TOKEN)
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Per-phone rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            cors_enabled: default_true(),
            // Empty by default - must be explicitly configured for production
            cors_origins: Vec::new(),
            admin_token: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-phone rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum inbound messages per minute per phone number
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,

    /// Burst allowance (multiple of rate limit)
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

fn default_messages_per_minute() -> u32 {
    20
}
fn default_burst_multiplier() -> f32 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_minute: default_messages_per_minute(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

/// Completion backend configuration (OpenAI-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Enable the remote backend (false = keyword heuristics only)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the chat-completions API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key (set via SALES_AGENT__LLM__API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,

    /// Retries on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    2
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// WhatsApp transport configuration (Twilio)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Enable real sends (false = simulated transport, logged only)
    #[serde(default)]
    pub enabled: bool,

    /// Account SID (set via SALES_AGENT__WHATSAPP__ACCOUNT_SID)
    #[serde(default)]
    pub account_sid: Option<String>,

    /// Auth token (set via SALES_AGENT__WHATSAPP__AUTH_TOKEN)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Sender address, e.g. "whatsapp:+5214920000000"
    #[serde(default = "default_from_number")]
    pub from_number: String,

    /// Business-owned numbers; inbound traffic from these is dropped
    #[serde(default)]
    pub own_numbers: Vec<String>,

    /// Maximum characters per outbound message before chunking
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_from_number() -> String {
    "whatsapp:+14155238886".to_string()
}
fn default_max_message_chars() -> usize {
    1500
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Simulated transport by default for development
            account_sid: None,
            auth_token: None,
            from_number: default_from_number(),
            own_numbers: Vec::new(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

/// Calendar integration configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalendarConfig {
    /// Enable calendar event creation (best effort, never blocks booking)
    #[serde(default)]
    pub enabled: bool,

    /// Target calendar identifier
    #[serde(default)]
    pub calendar_id: Option<String>,

    /// Path to the service-account credentials file
    #[serde(default)]
    pub credentials_path: Option<String>,
}

/// Engine behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Business local time as a fixed UTC offset (Zacatecas is -6)
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Window within which a repeat confirmation reuses the existing
    /// appointment instead of creating a duplicate
    #[serde(default = "default_dedup_minutes")]
    pub appointment_dedup_minutes: u32,

    /// Outbox worker tuning
    #[serde(default)]
    pub outbox: OutboxConfig,
}

fn default_utc_offset() -> i32 {
    -6
}
fn default_dedup_minutes() -> u32 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset(),
            appointment_dedup_minutes: default_dedup_minutes(),
            outbox: OutboxConfig::default(),
        }
    }
}

/// Outbox worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Seconds between queue polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Attempts before a task is parked as dead
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff, in seconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_seconds: u64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_backoff() -> u64 {
    30
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            max_attempts: default_max_attempts(),
            base_backoff_seconds: default_base_backoff(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable the Prometheus exporter
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Persistence configuration for ScyllaDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable ScyllaDB persistence (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,

    /// ScyllaDB host addresses
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,

    /// ScyllaDB keyspace name
    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,

    /// ScyllaDB replication factor
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "sales_agent".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Disabled by default for development
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (SALES_AGENT_ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SALES_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.agent.utc_offset_hours, -6);
        assert_eq!(settings.agent.appointment_dedup_minutes, 30);
        assert!(!settings.whatsapp.enabled);
        assert!(!settings.persistence.enabled);
    }

    #[test]
    fn test_server_validation() {
        let mut settings = Settings::default();

        settings.server.port = 0;
        assert!(settings.validate_server().is_err());
        settings.server.port = 8080;

        settings.server.timeout_seconds = 0;
        assert!(settings.validate_server().is_err());
        settings.server.timeout_seconds = 30;

        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut settings = Settings::default();
        settings.server.rate_limit.enabled = true;

        settings.server.rate_limit.messages_per_minute = 0;
        assert!(settings.validate_server().is_err());
        settings.server.rate_limit.messages_per_minute = 20;

        settings.server.rate_limit.burst_multiplier = 0.5;
        assert!(settings.validate_server().is_err());
        settings.server.rate_limit.burst_multiplier = 2.0;

        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn test_llm_validation() {
        let mut settings = Settings::default();

        settings.llm.temperature = 3.0;
        assert!(settings.validate_llm().is_err());
        settings.llm.temperature = 0.7;

        settings.llm.max_tokens = 0;
        assert!(settings.validate_llm().is_err());
        settings.llm.max_tokens = 500;

        // Development tolerates a missing key; production does not.
        settings.llm.api_key = None;
        assert!(settings.validate_llm().is_ok());
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_llm().is_err());
        settings.llm.api_key = Some("sk-test".to_string());
        assert!(settings.validate_llm().is_ok());
    }

    #[test]
    fn test_whatsapp_validation() {
        let mut settings = Settings::default();
        settings.whatsapp.enabled = true;
        settings.environment = RuntimeEnvironment::Production;

        assert!(settings.validate_whatsapp().is_err());

        settings.whatsapp.account_sid = Some("AC123".to_string());
        settings.whatsapp.auth_token = Some("token".to_string());
        assert!(settings.validate_whatsapp().is_ok());

        settings.whatsapp.from_number = String::new();
        assert!(settings.validate_whatsapp().is_err());
    }

    #[test]
    fn test_agent_validation() {
        let mut settings = Settings::default();

        settings.agent.utc_offset_hours = -15;
        assert!(settings.validate_agent().is_err());
        settings.agent.utc_offset_hours = -6;

        settings.agent.appointment_dedup_minutes = 0;
        assert!(settings.validate_agent().is_err());
        settings.agent.appointment_dedup_minutes = 30;

        settings.agent.outbox.max_attempts = 0;
        assert!(settings.validate_agent().is_err());
        settings.agent.outbox.max_attempts = 5;

        assert!(settings.validate_agent().is_ok());
    }
}
