//! HTTP server for the sales agent
//!
//! Exposes the WhatsApp webhook plus health, readiness, metrics and
//! admin endpoints. All conversational work happens in the agent crate;
//! this one parses the transport, applies rate limits and owns process
//! lifecycle.

pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod state;

pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use rate_limit::RateLimiter;
pub use state::{build_backend, AppState};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded")]
    RateLimit,
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Configuration(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
        }
    }
}
