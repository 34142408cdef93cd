//! Cadence definitions and enrollments.
//!
//! A cadence is an ordered list of time-offset outreach steps across
//! channels. Enrollments track a lead's position in one cadence; the
//! scheduler (`cadence::scheduler`) drives them.

pub mod scheduler;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channels::ChannelKind;
use crate::signals::state::LeadStatus;

pub use scheduler::{CadenceScheduler, ScanMode, ScanReport};

/// One step of a cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceStep {
    /// Days after enrollment this step becomes due.
    pub offset_days: u32,
    pub channel: ChannelKind,
    /// Template reference, resolved through the template catalog.
    pub template: String,
    /// Extra statuses that exit the cadence at this step. Terminal and
    /// replied statuses always exit regardless of this list.
    #[serde(default)]
    pub exit_statuses: Vec<LeadStatus>,
    /// Exit when the lead has at least this many opens (engagement is
    /// high enough that automated nudges should stop).
    #[serde(default)]
    pub exit_on_min_opens: Option<u32>,
}

/// A named, ordered cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<CadenceStep>,
}

impl CadenceDefinition {
    pub fn step(&self, index: u32) -> Option<&CadenceStep> {
        self.steps.get(index as usize)
    }

    /// Due timestamp for a step: enrollment time + that step's day offset.
    pub fn due_at(&self, enrolled_at: DateTime<Utc>, index: u32) -> Option<DateTime<Utc>> {
        self.step(index)
            .map(|s| enrolled_at + Duration::days(s.offset_days as i64))
    }
}

/// A lead's position in one cadence. One active enrollment per lead per
/// cadence; re-enrollment after exit is an explicit operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceEnrollment {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub cadence_id: String,
    pub step_index: u32,
    pub due_at: DateTime<Utc>,
    pub enrolled_at: DateTime<Utc>,
    pub active: bool,
    pub exit_reason: Option<String>,
}

impl CadenceEnrollment {
    pub fn new(lead_id: Uuid, definition: &CadenceDefinition, now: DateTime<Utc>) -> Self {
        let due_at = definition.due_at(now, 0).unwrap_or(now);
        Self {
            id: Uuid::new_v4(),
            lead_id,
            cadence_id: definition.id.clone(),
            step_index: 0,
            due_at,
            enrolled_at: now,
            active: true,
            exit_reason: None,
        }
    }
}

/// Why an exit predicate fired, if it did.
pub fn exit_reason(
    step: &CadenceStep,
    status: LeadStatus,
    opens: u32,
) -> Option<String> {
    if status.is_terminal() {
        return Some(format!("terminal status {status}"));
    }
    if status.has_replied() {
        return Some(format!("lead replied ({status})"));
    }
    if step.exit_statuses.contains(&status) {
        return Some(format!("step exit status {status}"));
    }
    if let Some(min) = step.exit_on_min_opens
        && opens >= min
    {
        return Some(format!("{opens} opens (threshold {min})"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> CadenceDefinition {
        CadenceDefinition {
            id: "default".into(),
            name: "Default outbound".into(),
            steps: vec![
                CadenceStep {
                    offset_days: 0,
                    channel: ChannelKind::Email,
                    template: "intro".into(),
                    exit_statuses: vec![],
                    exit_on_min_opens: None,
                },
                CadenceStep {
                    offset_days: 3,
                    channel: ChannelKind::Email,
                    template: "followup".into(),
                    exit_statuses: vec![LeadStatus::EngagedNotReplied],
                    exit_on_min_opens: Some(3),
                },
                CadenceStep {
                    offset_days: 7,
                    channel: ChannelKind::Social,
                    template: "social-nudge".into(),
                    exit_statuses: vec![],
                    exit_on_min_opens: None,
                },
            ],
        }
    }

    #[test]
    fn due_at_uses_enrollment_offset() {
        let def = definition();
        let enrolled = Utc::now();
        assert_eq!(def.due_at(enrolled, 0), Some(enrolled));
        assert_eq!(def.due_at(enrolled, 1), Some(enrolled + Duration::days(3)));
        assert_eq!(def.due_at(enrolled, 2), Some(enrolled + Duration::days(7)));
        assert_eq!(def.due_at(enrolled, 3), None);
    }

    #[test]
    fn new_enrollment_starts_at_step_zero() {
        let def = definition();
        let now = Utc::now();
        let e = CadenceEnrollment::new(Uuid::new_v4(), &def, now);
        assert_eq!(e.step_index, 0);
        assert_eq!(e.due_at, now);
        assert!(e.active);
    }

    #[test]
    fn exit_on_terminal_and_replied() {
        let def = definition();
        let step = &def.steps[0];
        assert!(exit_reason(step, LeadStatus::Bounced, 0).is_some());
        assert!(exit_reason(step, LeadStatus::Unsubscribed, 0).is_some());
        assert!(exit_reason(step, LeadStatus::Replied, 0).is_some());
        assert!(exit_reason(step, LeadStatus::SocialReplied, 0).is_some());
        assert!(exit_reason(step, LeadStatus::Sent, 0).is_none());
    }

    #[test]
    fn per_step_exit_statuses() {
        let def = definition();
        let step = &def.steps[1];
        assert!(exit_reason(step, LeadStatus::EngagedNotReplied, 0).is_some());
        // Step 0 has no such exit.
        assert!(exit_reason(&def.steps[0], LeadStatus::EngagedNotReplied, 0).is_none());
    }

    #[test]
    fn exit_on_open_threshold() {
        let def = definition();
        let step = &def.steps[1];
        assert!(exit_reason(step, LeadStatus::Opened, 2).is_none());
        assert!(exit_reason(step, LeadStatus::Opened, 3).is_some());
    }
}
