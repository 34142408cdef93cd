//! Social message channel — JSON over HTTPS to a direct-message API.
//!
//! Mirrors the email adapter's contract: `send` plus nothing else. The API
//! shape is the common bot-style POST endpoint; 4xx on the recipient is the
//! permanent class, 5xx/timeouts are transient.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{ChannelKind, DispatchCandidate, OutboundChannel, SendReceipt};
use crate::error::ChannelError;

/// Social channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    /// Message-send endpoint, e.g. `https://api.provider.example/v1/messages`.
    pub api_url: String,
    pub api_token: SecretString,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    20
}

/// Social direct-message channel.
pub struct SocialChannel {
    config: SocialConfig,
    client: reqwest::Client,
}

impl SocialChannel {
    pub fn new(config: SocialConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Misconfigured {
                name: "social".into(),
                reason: format!("HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

#[async_trait]
impl OutboundChannel for SocialChannel {
    fn name(&self) -> &str {
        "social"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Social
    }

    async fn send(&self, candidate: &DispatchCandidate) -> Result<SendReceipt, ChannelError> {
        let recipient = candidate.recipient().to_string();
        let body = serde_json::json!({
            "recipient": recipient,
            "text": candidate.message.body,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout {
                        name: "social".into(),
                        timeout: Duration::from_secs(self.config.timeout_secs),
                    }
                } else {
                    ChannelError::SendFailed {
                        name: "social".into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed: SendResponse = response.json().await.unwrap_or(SendResponse {
                message_id: None,
            });
            return Ok(SendReceipt {
                provider_message_id: parsed.message_id,
            });
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            // Unknown handle, blocked recipient, etc. — do not retry.
            Err(ChannelError::Permanent {
                name: "social".into(),
                recipient,
                reason: format!("{status}: {detail}"),
            })
        } else {
            Err(ChannelError::SendFailed {
                name: "social".into(),
                reason: format!("{status}: {detail}"),
            })
        }
    }
}
