//! Inbound engagement events.
//!
//! A `SignalEvent` is an immutable fact delivered by a provider webhook.
//! Events are append-only; the provider event id is the dedupe key under
//! at-least-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of engagement signal a provider can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Delivered,
    Opened,
    Replied,
    Bounced,
    Unsubscribed,
    SocialConnected,
    SocialReplied,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Replied => "replied",
            Self::Bounced => "bounced",
            Self::Unsubscribed => "unsubscribed",
            Self::SocialConnected => "social_connected",
            Self::SocialReplied => "social_replied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(Self::Delivered),
            "opened" => Some(Self::Opened),
            "replied" => Some(Self::Replied),
            "bounced" => Some(Self::Bounced),
            "unsubscribed" => Some(Self::Unsubscribed),
            "social_connected" => Some(Self::SocialConnected),
            "social_replied" => Some(Self::SocialReplied),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable inbound engagement fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Lead this event is about.
    pub lead_id: Uuid,
    /// What happened.
    pub kind: SignalKind,
    /// Provider-native event id — the idempotency key.
    pub provider_event_id: String,
    /// Which provider reported it.
    pub provider: String,
    /// When the provider says it happened.
    pub occurred_at: DateTime<Utc>,
    /// Raw provider payload, kept for audit.
    pub payload: serde_json::Value,
}

impl SignalEvent {
    pub fn new(lead_id: Uuid, kind: SignalKind, provider_event_id: impl Into<String>) -> Self {
        Self {
            lead_id,
            kind,
            provider_event_id: provider_event_id.into(),
            provider: String::new(),
            occurred_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}
