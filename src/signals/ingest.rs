//! Signal ingestion — the single entry point for engagement events.
//!
//! Webhooks deliver at-least-once; duplicates are recovered locally by the
//! event-id dedupe, never surfaced as errors. Per-lead status updates are
//! serialized through a per-lead lock shared with the decay sweep, so a
//! live event and a sweep pass can never both apply a stale transition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::ChannelKind;
use crate::error::{DatabaseError, Result};
use crate::leads::Lead;
use crate::signals::event::{SignalEvent, SignalKind};
use crate::signals::state::{
    self, AdvanceInput, DecayWindows, Disposition, LeadStatus, advance,
};
use crate::store::{AuditKind, AuditRecord, Database};

/// Outcome of ingesting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The lead's status changed.
    Transitioned { from: LeadStatus, to: LeadStatus },
    /// The event applied but produced no transition (including events
    /// against terminal states).
    NoChange,
    /// Same provider event id seen before — dropped silently.
    Duplicate,
    /// No lead with that id.
    UnknownLead,
}

/// Applies events, dispositions, and sweep observations to lead state.
pub struct SignalProcessor {
    store: Arc<dyn Database>,
    windows: DecayWindows,
    /// Per-lead locks. Single-writer discipline for status updates.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SignalProcessor {
    pub fn new(store: Arc<dyn Database>, windows: DecayWindows) -> Self {
        Self {
            store,
            windows,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn windows(&self) -> &DecayWindows {
        &self.windows
    }

    async fn lead_lock(&self, lead_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(lead_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ingest one inbound event. Idempotent under redelivery.
    pub async fn ingest(&self, event: SignalEvent) -> Result<IngestOutcome> {
        let inserted = self.store.insert_signal_event(&event).await?;
        if !inserted {
            debug!(
                lead = %event.lead_id,
                event_id = %event.provider_event_id,
                "Duplicate event dropped"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let lock = self.lead_lock(event.lead_id).await;
        let _guard = lock.lock().await;

        let Some(lead) = self.store.get_lead(event.lead_id).await? else {
            warn!(lead = %event.lead_id, "Event for unknown lead");
            return Ok(IngestOutcome::UnknownLead);
        };

        let from = lead.status;
        let to = advance(from, AdvanceInput::Event(event.kind), &self.windows);
        if to == from {
            return Ok(IngestOutcome::NoChange);
        }

        self.apply_transition(&lead, from, to, event.occurred_at)
            .await?;
        Ok(IngestOutcome::Transitioned { from, to })
    }

    /// Apply an operator disposition (approve / meeting booked / reject /
    /// disqualify). Terminal states absorb these like any other input.
    pub async fn apply_disposition(
        &self,
        lead_id: Uuid,
        disposition: Disposition,
    ) -> Result<IngestOutcome> {
        let lock = self.lead_lock(lead_id).await;
        let _guard = lock.lock().await;

        let Some(lead) = self.store.get_lead(lead_id).await? else {
            return Ok(IngestOutcome::UnknownLead);
        };

        let from = lead.status;
        let to = state::apply_disposition(from, disposition);
        if to == from {
            return Ok(IngestOutcome::NoChange);
        }

        self.apply_transition(&lead, from, to, Utc::now()).await?;
        Ok(IngestOutcome::Transitioned { from, to })
    }

    /// Record a confirmed provider send: the lead moves to `sent` (email)
    /// or `social_sent` (social). Called by the dispatch coordinator only.
    pub async fn record_send(&self, lead_id: Uuid, channel: ChannelKind) -> Result<IngestOutcome> {
        let lock = self.lead_lock(lead_id).await;
        let _guard = lock.lock().await;

        let Some(lead) = self.store.get_lead(lead_id).await? else {
            return Ok(IngestOutcome::UnknownLead);
        };

        let from = lead.status;
        if from.is_terminal() {
            return Ok(IngestOutcome::NoChange);
        }

        let to = match channel {
            ChannelKind::Email => LeadStatus::Sent,
            ChannelKind::Social => LeadStatus::SocialSent,
        };
        if to == from {
            return Ok(IngestOutcome::NoChange);
        }

        self.apply_transition(&lead, from, to, Utc::now()).await?;
        Ok(IngestOutcome::Transitioned { from, to })
    }

    /// Record a permanent provider failure: straight to a terminal status
    /// plus a suppression entry.
    pub async fn record_permanent_failure(
        &self,
        lead_id: Uuid,
        reason: &str,
    ) -> Result<IngestOutcome> {
        let lock = self.lead_lock(lead_id).await;
        let _guard = lock.lock().await;

        let Some(lead) = self.store.get_lead(lead_id).await? else {
            return Ok(IngestOutcome::UnknownLead);
        };

        let from = lead.status;
        if from.is_terminal() {
            return Ok(IngestOutcome::NoChange);
        }

        info!(lead = %lead_id, reason, "Permanent provider failure");
        self.apply_transition(&lead, from, LeadStatus::Bounced, Utc::now())
            .await?;
        Ok(IngestOutcome::Transitioned {
            from,
            to: LeadStatus::Bounced,
        })
    }

    /// One decay-sweep pass over a single lead: compare elapsed time and
    /// open/reply counts against the configured windows.
    pub async fn sweep_lead(&self, lead_id: Uuid) -> Result<IngestOutcome> {
        let lock = self.lead_lock(lead_id).await;
        let _guard = lock.lock().await;

        let Some(lead) = self.store.get_lead(lead_id).await? else {
            return Ok(IngestOutcome::UnknownLead);
        };

        let from = lead.status;
        if from.is_terminal() {
            return Ok(IngestOutcome::NoChange);
        }

        let opens = self
            .store
            .count_signal_events(lead.id, SignalKind::Opened)
            .await?;
        let replies = self
            .store
            .count_signal_events(lead.id, SignalKind::Replied)
            .await?
            + self
                .store
                .count_signal_events(lead.id, SignalKind::SocialReplied)
                .await?;

        let now = Utc::now();
        let elapsed = now.signed_duration_since(lead.last_activity_at);
        let to = advance(
            from,
            AdvanceInput::Elapsed {
                since_last_activity: elapsed,
                opens,
                replies,
            },
            &self.windows,
        );
        if to == from {
            return Ok(IngestOutcome::NoChange);
        }

        // Decay transitions keep the original activity timestamp: the lead
        // did nothing new, we only noticed the silence.
        self.store
            .update_lead_status(lead.id, to, lead.last_activity_at)
            .await?;
        info!(lead = %lead.id, from = %from, to = %to, "Decay sweep transition");
        Ok(IngestOutcome::Transitioned { from, to })
    }

    async fn apply_transition(
        &self,
        lead: &Lead,
        from: LeadStatus,
        to: LeadStatus,
        at: chrono::DateTime<Utc>,
    ) -> std::result::Result<(), DatabaseError> {
        self.store.update_lead_status(lead.id, to, at).await?;
        info!(lead = %lead.id, from = %from, to = %to, "Lead transition");

        if to.is_terminal() {
            self.store
                .append_audit(&AuditRecord::new(
                    AuditKind::TerminalTransition,
                    Some(lead.id),
                    to.as_str(),
                    &format!("from {from}"),
                ))
                .await?;

            // Hard bounces and unsubscribes feed the suppression list so
            // future cadence steps skip this address.
            if matches!(to, LeadStatus::Bounced | LeadStatus::Unsubscribed) {
                self.store
                    .add_suppression(&lead.address, to.as_str())
                    .await?;
            }
        }

        Ok(())
    }
}
