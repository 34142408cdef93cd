//! Outbound channel abstraction.
//!
//! A channel adapter is pure I/O: it exposes `send` and nothing else the
//! core relies on. Anything like "pause all sending" is implemented locally
//! by the breaker and emergency stop — never delegated to a provider method
//! that may not exist.

pub mod email;
pub mod social;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::leads::Lead;

pub use email::{EmailChannel, EmailConfig};
pub use social::{SocialChannel, SocialConfig};

/// Which outbound channel a message goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Social,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Social => "social",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "social" => Some(Self::Social),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    /// Subject line; social messages have none.
    pub subject: Option<String>,
    pub body: String,
    /// Template reference this draft was rendered from.
    pub template: String,
}

/// A (lead, channel, proposed message) triple submitted to the guard chain.
///
/// Transient: built per attempt, never persisted.
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    pub lead: Lead,
    pub channel: ChannelKind,
    pub message: MessageDraft,
}

impl DispatchCandidate {
    /// Recipient identity on the candidate's channel: primary address for
    /// email, profile handle for social (falls back to the address).
    pub fn recipient(&self) -> &str {
        match self.channel {
            ChannelKind::Email => &self.lead.address,
            ChannelKind::Social => self
                .lead
                .profile_handle
                .as_deref()
                .unwrap_or(&self.lead.address),
        }
    }
}

/// Provider acceptance of a send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider-native message id, when the provider reports one.
    pub provider_message_id: Option<String>,
}

/// An outbound provider adapter.
///
/// The minimal capability contract: `send` plus best-effort in-flight
/// cancellation. The core never assumes anything beyond this.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Provider name for logging and breaker keying.
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    /// Attempt delivery. Errors are classified transient vs permanent via
    /// `ChannelError::is_permanent`.
    async fn send(&self, candidate: &DispatchCandidate) -> Result<SendReceipt, ChannelError>;

    /// Best-effort cancellation of in-flight work. Default no-op.
    async fn cancel_in_flight(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::LeadAttributes;

    #[test]
    fn recipient_per_channel() {
        let lead = Lead::new("ana@example.com", LeadAttributes::default())
            .with_profile_handle("ana-dev");
        let draft = MessageDraft {
            subject: None,
            body: "hi".into(),
            template: "t1".into(),
        };
        let email = DispatchCandidate {
            lead: lead.clone(),
            channel: ChannelKind::Email,
            message: draft.clone(),
        };
        assert_eq!(email.recipient(), "ana@example.com");

        let social = DispatchCandidate {
            lead,
            channel: ChannelKind::Social,
            message: draft,
        };
        assert_eq!(social.recipient(), "ana-dev");
    }

    #[test]
    fn channel_kind_roundtrip() {
        assert_eq!(ChannelKind::parse("email"), Some(ChannelKind::Email));
        assert_eq!(ChannelKind::parse("social"), Some(ChannelKind::Social));
        assert_eq!(ChannelKind::parse("fax"), None);
    }
}
