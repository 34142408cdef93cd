//! Dispatch — the coordinator and its admission controls.

pub mod coordinator;
pub mod ramp;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::channels::ChannelKind;
use crate::guards::GuardKind;
use crate::leads::Lead;
use crate::scoring::Tier;

pub use coordinator::{CycleContext, DispatchCoordinator};
pub use ramp::{RampConfig, RampController, RampDirective, VolumeConfig};

/// Operator-controlled kill switch.
///
/// Checked at the start of every dispatch attempt — not just batch start —
/// so an engaged stop takes effect within one in-flight item. A pure local
/// flag: halting never depends on any provider capability.
#[derive(Debug, Clone, Default)]
pub struct EmergencyStop {
    engaged: Arc<AtomicBool>,
}

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
        tracing::warn!("Emergency stop engaged — all dispatch halted");
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
        tracing::info!("Emergency stop released");
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

/// Bounded retry with exponential backoff for transient provider failures.
/// Policy rejections are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

/// A dispatch request: which lead, through which channel, with which
/// template. The coordinator scores, renders, guards, and sends.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub lead: Lead,
    pub channel: ChannelKind,
    pub template: String,
}

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Provider accepted; lead advanced to sent / social_sent.
    Sent { tier: Tier },
    /// Emergency stop engaged.
    Stopped,
    /// Tier outside the active ramp allow-list.
    RampFiltered { tier: Tier },
    /// Daily send ceiling reached.
    CeilingReached,
    /// Rejected by the guard chain. Policy — never retried.
    GuardRejected { guard: GuardKind, reason: String },
    /// Rate limiter ceiling hit; retry on a later cycle.
    RateLimited { reason: String },
    /// Circuit open; rejected locally with zero provider calls.
    CircuitOpen,
    /// Transient provider failure, retries exhausted.
    TransientFailure { reason: String },
    /// Hard bounce class — lead moved to terminal status and suppressed.
    PermanentFailure { reason: String },
    /// Could not build the candidate (unknown template or channel).
    Skipped { reason: String },
}

impl DispatchOutcome {
    /// A live, confirmed provider send. Only this advances cadence steps.
    pub fn is_confirmed_send(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Permanent policy outcomes — the cadence should exit, not retry.
    pub fn is_policy_exit(&self) -> bool {
        matches!(
            self,
            Self::GuardRejected { .. } | Self::PermanentFailure { .. } | Self::Skipped { .. }
        )
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Stopped => "stopped",
            Self::RampFiltered { .. } => "ramp_filtered",
            Self::CeilingReached => "ceiling_reached",
            Self::GuardRejected { .. } => "guard_rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::TransientFailure { .. } => "transient_failure",
            Self::PermanentFailure { .. } => "permanent_failure",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_roundtrip() {
        let stop = EmergencyStop::new();
        assert!(!stop.is_engaged());
        stop.engage();
        assert!(stop.is_engaged());
        // Clones share the flag.
        let other = stop.clone();
        other.release();
        assert!(!stop.is_engaged());
    }

    #[test]
    fn outcome_classification() {
        assert!(DispatchOutcome::Sent { tier: Tier::Tier1 }.is_confirmed_send());
        assert!(!DispatchOutcome::CircuitOpen.is_confirmed_send());
        assert!(
            DispatchOutcome::GuardRejected {
                guard: GuardKind::DomainExclusion,
                reason: "x".into()
            }
            .is_policy_exit()
        );
        assert!(!DispatchOutcome::RateLimited { reason: "x".into() }.is_policy_exit());
        assert!(!DispatchOutcome::Stopped.is_policy_exit());
    }
}
