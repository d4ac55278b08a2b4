//! Completion backend and message classification
//!
//! Features:
//! - OpenAI-compatible chat-completions client with bounded retries
//! - Prompt assembly with the business catalog baked into the system prompt
//! - Tolerant JSON extraction from model replies: a malformed reply
//!   degrades to sending the raw text, never to an error

pub mod backend;
pub mod classifier;
pub mod prompt;

pub use backend::{BackendConfig, CompletionBackend, OpenAiBackend};
pub use classifier::{ClassifierOutcome, ExtractedData, Intent, IntentClassifier};
pub use prompt::{build_classifier_messages, ChatMessage, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
