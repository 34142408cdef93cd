//! Email channel — SMTP via lettre.
//!
//! Outbound only: engagement comes back through provider webhooks, not by
//! polling a mailbox. SMTP 5xx responses are the permanent-failure class
//! (hard bounce / invalid recipient); everything else is transient.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{ChannelKind, DispatchCandidate, OutboundChannel, SendReceipt};
use crate::error::ChannelError;

/// Email channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Per-call send timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    30
}

/// SMTP outbound channel.
pub struct EmailChannel {
    config: EmailConfig,
    transport: SmtpTransport,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Result<Self, ChannelError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| ChannelError::Misconfigured {
                name: "email".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { config, transport })
    }

    fn build_message(&self, candidate: &DispatchCandidate) -> Result<Message, ChannelError> {
        let to = candidate.recipient();

        Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| ChannelError::Misconfigured {
                        name: "email".into(),
                        reason: format!("Invalid from address: {e}"),
                    })?,
            )
            .to(to.parse().map_err(|e| ChannelError::Permanent {
                name: "email".into(),
                recipient: to.to_string(),
                reason: format!("Invalid recipient address: {e}"),
            })?)
            .subject(candidate.message.subject.as_deref().unwrap_or_default())
            .body(candidate.message.body.clone())
            .map_err(|e| ChannelError::SendFailed {
                name: "email".into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl OutboundChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, candidate: &DispatchCandidate) -> Result<SendReceipt, ChannelError> {
        let message = self.build_message(candidate)?;
        let recipient = candidate.recipient().to_string();
        let transport = self.transport.clone();

        // lettre's SMTP transport is blocking; keep it off the runtime.
        let result = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "email".into(),
                reason: format!("send task failed: {e}"),
            })?;

        match result {
            Ok(response) => Ok(SendReceipt {
                provider_message_id: response.message().next().map(str::to_string),
            }),
            Err(e) if e.is_permanent() => Err(ChannelError::Permanent {
                name: "email".into(),
                recipient,
                reason: e.to_string(),
            }),
            Err(e) => Err(ChannelError::SendFailed {
                name: "email".into(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MessageDraft;
    use crate::leads::{Lead, LeadAttributes};

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "sender@example.com".into(),
            password: "secret".to_string().into(),
            from_address: "sender@example.com".into(),
            timeout_secs: 30,
        }
    }

    fn candidate(address: &str) -> DispatchCandidate {
        DispatchCandidate {
            lead: Lead::new(address, LeadAttributes::default()),
            channel: ChannelKind::Email,
            message: MessageDraft {
                subject: Some("Hello".into()),
                body: "Hi there".into(),
                template: "t1".into(),
            },
        }
    }

    #[test]
    fn builds_message_for_valid_recipient() {
        let channel = EmailChannel::new(config()).unwrap();
        assert!(channel.build_message(&candidate("ana@example.com")).is_ok());
    }

    #[test]
    fn invalid_recipient_is_permanent() {
        let channel = EmailChannel::new(config()).unwrap();
        let err = channel
            .build_message(&candidate("not an address"))
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
