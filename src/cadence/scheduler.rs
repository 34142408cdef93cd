//! Cadence scheduler — the periodic scan loop.
//!
//! Each pass walks the active enrollments whose step is due, evaluates the
//! step's exit predicate against the lead's current status and event
//! history, and either exits the enrollment or asks the dispatch
//! coordinator to send. Only a live, confirmed dispatch advances the step
//! index: a dry-run scan never mutates enrollment state, so simulations
//! can't corrupt future real runs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cadence::{CadenceEnrollment, exit_reason};
use crate::config::ConfigHandle;
use crate::dispatch::{DispatchCoordinator, DispatchOutcome, DispatchRequest};
use crate::error::{CadenceError, Result, SignalError};
use crate::signals::SignalKind;
use crate::store::Database;

/// Whether a scan is allowed to mutate state and call providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Live,
    DryRun,
}

/// What one scan decided per enrollment.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub enrollment_id: Uuid,
    pub lead_id: Uuid,
    pub kind: PlannedKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedKind {
    /// Exit predicate fired; enrollment ends.
    Exit,
    /// A step dispatch (would) go out.
    Dispatch,
    /// Held for a later cycle (capacity or transient conditions).
    Hold,
}

/// Summary of one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub dispatched: usize,
    pub exited: usize,
    pub actions: Vec<PlannedAction>,
}

/// The scheduler. Single cooperative loop; enrollments are processed
/// sequentially within a pass.
pub struct CadenceScheduler {
    store: Arc<dyn Database>,
    coordinator: Arc<DispatchCoordinator>,
    config: Arc<ConfigHandle>,
}

impl CadenceScheduler {
    pub fn new(
        store: Arc<dyn Database>,
        coordinator: Arc<DispatchCoordinator>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        Self {
            store,
            coordinator,
            config,
        }
    }

    /// Enroll a lead into a cadence. One active enrollment per lead per
    /// cadence; re-enrollment after an exit is exactly this call again —
    /// an explicit operator action, never automatic.
    pub async fn enroll(&self, lead_id: Uuid, cadence_id: &str) -> Result<CadenceEnrollment> {
        let snapshot = self.config.snapshot().await;
        let Some(definition) = snapshot.cadences.iter().find(|c| c.id == cadence_id) else {
            return Err(CadenceError::UnknownCadence(cadence_id.to_string()).into());
        };

        if self.store.get_lead(lead_id).await?.is_none() {
            return Err(SignalError::UnknownLead(lead_id).into());
        }

        if self
            .store
            .get_active_enrollment(lead_id, cadence_id)
            .await?
            .is_some()
        {
            return Err(CadenceError::AlreadyEnrolled {
                lead_id,
                cadence: cadence_id.to_string(),
            }
            .into());
        }

        let enrollment = CadenceEnrollment::new(lead_id, definition, Utc::now());
        self.store.insert_enrollment(&enrollment).await?;
        info!(
            lead = %lead_id,
            cadence = %cadence_id,
            enrollment = %enrollment.id,
            "Lead enrolled"
        );
        Ok(enrollment)
    }

    /// One scan pass.
    pub async fn scan(&self, mode: ScanMode) -> Result<ScanReport> {
        let snapshot = self.config.snapshot().await;
        let now = Utc::now();

        // Outside the configured send window, live passes do nothing.
        if mode == ScanMode::Live
            && let Some(window) = &snapshot.dispatch.send_window
            && let Ok(schedule) = cron::Schedule::from_str(window)
            && !schedule.includes(now)
        {
            debug!("Outside send window, skipping dispatch cycle");
            return Ok(ScanReport::default());
        }

        let due = self.store.list_due_enrollments(now).await?;
        let mut report = ScanReport {
            scanned: due.len(),
            ..Default::default()
        };
        let mut ctx = self.coordinator.begin_cycle().await?;

        for enrollment in due {
            let Some(definition) = snapshot
                .cadences
                .iter()
                .find(|c| c.id == enrollment.cadence_id)
            else {
                warn!(
                    enrollment = %enrollment.id,
                    cadence = %enrollment.cadence_id,
                    "Cadence definition no longer configured"
                );
                if mode == ScanMode::Live {
                    self.store
                        .deactivate_enrollment(enrollment.id, "cadence removed")
                        .await?;
                }
                continue;
            };

            let Some(step) = definition.step(enrollment.step_index) else {
                if mode == ScanMode::Live {
                    self.store
                        .deactivate_enrollment(enrollment.id, "completed")
                        .await?;
                }
                continue;
            };

            let Some(lead) = self.store.get_lead(enrollment.lead_id).await? else {
                warn!(enrollment = %enrollment.id, "Enrollment references missing lead");
                if mode == ScanMode::Live {
                    self.store
                        .deactivate_enrollment(enrollment.id, "lead missing")
                        .await?;
                }
                continue;
            };

            let opens = self
                .store
                .count_signal_events(lead.id, SignalKind::Opened)
                .await?;

            // Exit predicate: terminal/replied always exit, plus the
            // step's own conditions.
            if let Some(reason) = exit_reason(step, lead.status, opens) {
                report.exited += 1;
                report.actions.push(PlannedAction {
                    enrollment_id: enrollment.id,
                    lead_id: lead.id,
                    kind: PlannedKind::Exit,
                    detail: reason.clone(),
                });
                if mode == ScanMode::Live {
                    info!(
                        enrollment = %enrollment.id,
                        lead = %lead.id,
                        reason = %reason,
                        "Cadence exit"
                    );
                    self.store
                        .deactivate_enrollment(enrollment.id, &reason)
                        .await?;
                }
                continue;
            }

            let request = DispatchRequest {
                lead,
                channel: step.channel,
                template: step.template.clone(),
            };

            if mode == ScanMode::DryRun {
                // Simulation: report the step that would fire. No dispatch,
                // no enrollment mutation.
                report.actions.push(PlannedAction {
                    enrollment_id: enrollment.id,
                    lead_id: enrollment.lead_id,
                    kind: PlannedKind::Dispatch,
                    detail: format!(
                        "step {} via {} ({})",
                        enrollment.step_index, step.channel, step.template
                    ),
                });
                continue;
            }

            let outcome = self.coordinator.dispatch(&mut ctx, request).await?;
            match &outcome {
                DispatchOutcome::Stopped => {
                    report.actions.push(PlannedAction {
                        enrollment_id: enrollment.id,
                        lead_id: enrollment.lead_id,
                        kind: PlannedKind::Hold,
                        detail: "emergency stop".into(),
                    });
                    // No point scanning further this pass.
                    break;
                }
                outcome if outcome.is_confirmed_send() => {
                    report.dispatched += 1;
                    report.actions.push(PlannedAction {
                        enrollment_id: enrollment.id,
                        lead_id: enrollment.lead_id,
                        kind: PlannedKind::Dispatch,
                        detail: format!("step {} sent", enrollment.step_index),
                    });
                    self.advance(&enrollment, definition).await?;
                }
                outcome if outcome.is_policy_exit() => {
                    report.exited += 1;
                    report.actions.push(PlannedAction {
                        enrollment_id: enrollment.id,
                        lead_id: enrollment.lead_id,
                        kind: PlannedKind::Exit,
                        detail: outcome.label().to_string(),
                    });
                    self.store
                        .deactivate_enrollment(enrollment.id, outcome.label())
                        .await?;
                }
                other => {
                    // Capacity or transient conditions: the step stays due
                    // and a later cycle retries it.
                    report.actions.push(PlannedAction {
                        enrollment_id: enrollment.id,
                        lead_id: enrollment.lead_id,
                        kind: PlannedKind::Hold,
                        detail: other.label().to_string(),
                    });
                }
            }
        }

        debug!(
            scanned = report.scanned,
            dispatched = report.dispatched,
            exited = report.exited,
            "Cadence scan complete"
        );
        Ok(report)
    }

    /// Move a confirmed enrollment to its next step, or complete it after
    /// the final step.
    async fn advance(
        &self,
        enrollment: &CadenceEnrollment,
        definition: &crate::cadence::CadenceDefinition,
    ) -> Result<()> {
        let next = enrollment.step_index + 1;
        match definition.due_at(enrollment.enrolled_at, next) {
            Some(due_at) => {
                self.store
                    .advance_enrollment(enrollment.id, next, due_at)
                    .await?;
                debug!(
                    enrollment = %enrollment.id,
                    step = next,
                    due = %due_at,
                    "Enrollment advanced"
                );
            }
            None => {
                self.store
                    .deactivate_enrollment(enrollment.id, "completed")
                    .await?;
                info!(enrollment = %enrollment.id, "Cadence completed");
            }
        }
        Ok(())
    }

    /// Spawn the scan loop.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.scan(ScanMode::Live).await {
                    error!("Cadence scan failed: {e}");
                }
            }
        })
    }
}
