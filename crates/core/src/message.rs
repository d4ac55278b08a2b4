//! Inbound webhook message envelope and transport-noise detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status-callback bodies the transport posts to the same webhook.
const STATUS_WORDS: [&str; 6] = ["sent", "delivered", "read", "failed", "queued", "undelivered"];

/// One inbound WhatsApp message as received from the transport webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Raw sender address, e.g. `whatsapp:+5214921234567`.
    pub from: String,
    pub body: String,
    /// WhatsApp profile name when the transport forwards it.
    pub profile_name: Option<String>,
    /// Transport message id, used only for logging.
    pub message_sid: Option<String>,
    pub media_count: u32,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            body: body.into(),
            profile_name: None,
            message_sid: None,
            media_count: 0,
            received_at: Utc::now(),
        }
    }

    /// Sender reduced to its last 10 digits.
    pub fn phone_digits(&self) -> String {
        crate::phone::last_ten(&self.from)
    }

    /// Transport artifacts that must be discarded before any handling:
    /// empty bodies without media and delivery-status callbacks whose
    /// body is exactly a status word.
    pub fn is_transport_noise(&self) -> bool {
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            return self.media_count == 0;
        }
        let lowered = trimmed.to_lowercase();
        STATUS_WORDS.contains(&lowered.as_str())
    }
}
