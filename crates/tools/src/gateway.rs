//! Outbound WhatsApp messaging
//!
//! `MessageGateway` is the seam between the engine and Twilio. The real
//! implementation posts to the Messages API; the simulated one records
//! sends for tests and credential-less development. Long texts are
//! chunked before sending so WhatsApp never truncates them.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use sales_agent_config::WhatsAppConfig;
use sales_agent_core::phone::whatsapp_address;
use sales_agent_core::text::chunk_message;

use crate::ToolsError;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause between chunks of one logical message so they arrive in order.
const CHUNK_GAP: Duration = Duration::from_millis(400);

/// Outbound message transport
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Deliver one message to a phone number in any accepted format.
    /// Texts over the chunk limit go out as several messages.
    async fn send(&self, to: &str, body: &str) -> Result<(), ToolsError>;
}

/// Pick the transport the configuration asks for.
///
/// Credentials missing while enabled is a hard error; disabled always
/// yields the simulated transport.
pub fn build_gateway(config: &WhatsAppConfig) -> Result<Arc<dyn MessageGateway>, ToolsError> {
    if config.enabled {
        Ok(Arc::new(TwilioGateway::new(config)?))
    } else {
        tracing::info!("WhatsApp transport disabled; using simulated gateway");
        Ok(Arc::new(SimulatedGateway::new()))
    }
}

/// Twilio WhatsApp transport
pub struct TwilioGateway {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    max_message_chars: usize,
}

impl TwilioGateway {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ToolsError> {
        let account_sid = config.account_sid.clone().ok_or_else(|| {
            ToolsError::Configuration("whatsapp.account_sid is required".to_string())
        })?;
        let auth_token = config.auth_token.clone().ok_or_else(|| {
            ToolsError::Configuration("whatsapp.auth_token is required".to_string())
        })?;

        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| ToolsError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            account_sid,
            auth_token,
            from_number: config.from_number.clone(),
            max_message_chars: config.max_message_chars,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", TWILIO_API_BASE, self.account_sid)
    }

    async fn send_one(&self, to: &str, body: &str) -> Result<(), ToolsError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail: TwilioErrorBody = response.json().await.unwrap_or_default();
            return Err(ToolsError::Gateway(format!(
                "Twilio {} (code {}): {}",
                status,
                detail.code.unwrap_or(0),
                detail.message.unwrap_or_else(|| "unknown error".to_string()),
            )));
        }

        let sent: TwilioMessageBody = response
            .json()
            .await
            .map_err(|e| ToolsError::Gateway(format!("Twilio response: {e}")))?;
        tracing::info!(to = %to, sid = %sent.sid, chars = body.chars().count(), "WhatsApp message sent");
        Ok(())
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), ToolsError> {
        let address = whatsapp_address(to);
        let chunks = chunk_message(body, self.max_message_chars);
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            self.send_one(&address, chunk).await?;
            if i + 1 < total {
                tokio::time::sleep(CHUNK_GAP).await;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageBody {
    sid: String,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Recorded outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
}

/// Transport that records instead of sending. Default in development,
/// and the assertion surface for conversation tests.
#[derive(Default)]
pub struct SimulatedGateway {
    sent: Mutex<Vec<SentMessage>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Messages aimed at one phone, matched on the last ten digits.
    pub fn sent_to(&self, phone: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| sales_agent_core::phone::same_number(&m.to, phone))
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl MessageGateway for SimulatedGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), ToolsError> {
        tracing::info!(to = %to, chars = body.chars().count(), "Simulated send");
        self.sent.lock().push(SentMessage {
            to: whatsapp_address(to),
            body: body.to_string(),
        });
        Ok(())
    }
}
