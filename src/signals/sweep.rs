//! Decay-detection sweep.
//!
//! Periodically scans leads in decay-eligible statuses and applies the
//! elapsed-time transitions (`ghosted` / `stalled` / `engaged_not_replied` /
//! `social_exhausted`) even when no new event arrives. All status writes go
//! through the signal processor's per-lead locks, so a sweep pass cannot
//! race a live webhook.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::Result;
use crate::signals::ingest::{IngestOutcome, SignalProcessor};
use crate::signals::state::LeadStatus;
use crate::store::Database;

/// Statuses the sweep looks at. Everything else either cannot decay or is
/// terminal.
const SWEEPABLE: &[LeadStatus] = &[
    LeadStatus::Sent,
    LeadStatus::Opened,
    LeadStatus::Stalled,
    LeadStatus::SocialSent,
    LeadStatus::SocialConnected,
];

/// The periodic decay sweep.
pub struct DecaySweep {
    store: Arc<dyn Database>,
    processor: Arc<SignalProcessor>,
    interval: Duration,
}

impl DecaySweep {
    pub fn new(
        store: Arc<dyn Database>,
        processor: Arc<SignalProcessor>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            interval,
        }
    }

    /// One full pass. Returns how many leads transitioned.
    pub async fn run_once(&self) -> Result<usize> {
        let leads = self.store.list_leads_with_status(SWEEPABLE).await?;
        let mut transitioned = 0;

        for lead in leads {
            match self.processor.sweep_lead(lead.id).await {
                Ok(IngestOutcome::Transitioned { .. }) => transitioned += 1,
                Ok(_) => {}
                Err(e) => error!(lead = %lead.id, "Sweep failed for lead: {e}"),
            }
        }

        debug!(transitioned, "Decay sweep pass complete");
        Ok(transitioned)
    }

    /// Spawn the sweep loop as a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // Skip the immediate first tick.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Decay sweep pass failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::{Lead, LeadAttributes};
    use crate::signals::state::DecayWindows;
    use crate::store::LibSqlBackend;
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn sweeps_silent_lead_to_ghosted() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut lead = Lead::new("ana@example.com", LeadAttributes::default());
        lead.status = LeadStatus::Sent;
        store.insert_lead(&lead).await.unwrap();
        // Sent five days ago, ghost window is four.
        store
            .update_lead_status(
                lead.id,
                LeadStatus::Sent,
                Utc::now() - ChronoDuration::days(5),
            )
            .await
            .unwrap();

        let processor = Arc::new(SignalProcessor::new(
            store.clone(),
            DecayWindows::default(),
        ));
        let sweep = DecaySweep::new(store.clone(), processor, Duration::from_secs(60));

        let transitioned = sweep.run_once().await.unwrap();
        assert_eq!(transitioned, 1);
        let stored = store.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Ghosted);
    }

    #[tokio::test]
    async fn fresh_lead_is_left_alone() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut lead = Lead::new("ana@example.com", LeadAttributes::default());
        lead.status = LeadStatus::Sent;
        store.insert_lead(&lead).await.unwrap();

        let processor = Arc::new(SignalProcessor::new(
            store.clone(),
            DecayWindows::default(),
        ));
        let sweep = DecaySweep::new(store.clone(), processor, Duration::from_secs(60));

        assert_eq!(sweep.run_once().await.unwrap(), 0);
        let stored = store.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Sent);
    }
}
