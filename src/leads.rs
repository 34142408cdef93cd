//! Lead model — identity, profile attributes, and the enrichment lookup.
//!
//! A lead is created the first time it is scored and is never deleted;
//! its lifecycle status only moves forward through the signal state
//! machine (`signals::state`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::signals::state::LeadStatus;

/// Profile attributes used by the scoring engine.
///
/// Supplied by the enrichment source; free-text fields are matched against
/// the configured keyword tables, never interpreted beyond that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadAttributes {
    /// Job title as reported, e.g. "VP of Engineering".
    pub title: String,
    /// Organization name.
    pub organization: String,
    /// Organization head count.
    pub org_size: u32,
    /// Industry as reported, e.g. "fintech".
    pub industry: String,
    /// Free-text technology/stack signals ("kubernetes", "terraform", ...).
    pub tech_signals: Vec<String>,
    /// Free-text intent signals ("hiring SRE", "migrating to cloud", ...).
    pub intent_signals: Vec<String>,
    /// Points earned from prior engagement (event-derived, not profile-derived).
    pub engagement_bonus: u32,
}

/// A lead: identity + attributes + mutable lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Stable opaque id.
    pub id: Uuid,
    /// Primary contact address (email-like).
    pub address: String,
    /// Secondary profile handle for the social channel.
    pub profile_handle: Option<String>,
    /// Scoring attributes.
    pub attributes: LeadAttributes,
    /// Current lifecycle status. Mutated only through the signal processor.
    pub status: LeadStatus,
    /// Timestamp of the last status-affecting activity (send or signal).
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Create a new lead in the initial `pending` status.
    pub fn new(address: impl Into<String>, attributes: LeadAttributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            profile_handle: None,
            attributes,
            status: LeadStatus::Pending,
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_profile_handle(mut self, handle: impl Into<String>) -> Self {
        self.profile_handle = Some(handle.into());
        self
    }

    /// The recipient domain of the primary address, lowercased.
    /// Empty string if the address has no `@`.
    pub fn domain(&self) -> String {
        domain_of(&self.address)
    }
}

/// Extract the lowercased domain part of an address.
pub fn domain_of(address: &str) -> String {
    address
        .rsplit_once('@')
        .map(|(_, d)| d.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read-only lookup of lead attributes by id.
///
/// The enrichment connector itself is an external collaborator; the engine
/// only consumes this narrow interface. "Not found" is a defined outcome,
/// not an error.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn lookup(&self, lead_id: Uuid) -> Result<Option<LeadAttributes>, DatabaseError>;
}
