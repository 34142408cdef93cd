//! Lead lifecycle state machine.
//!
//! The transition function is pure: (current status, input, windows) → new
//! status. Inputs are either an inbound `SignalEvent` kind, an operator
//! disposition, or elapsed time observed by the decay sweep. Terminal states
//! absorb every input.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::signals::event::SignalKind;

/// Current node of the lead lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    // Primary happy path.
    Pending,
    Approved,
    Dispatched,
    Sent,
    Opened,
    Replied,
    MeetingBooked,
    // Lateral decay states.
    Ghosted,
    Stalled,
    EngagedNotReplied,
    // Social sub-path.
    SocialSent,
    SocialConnected,
    SocialReplied,
    SocialExhausted,
    // Terminal (absorbing).
    Bounced,
    Unsubscribed,
    Rejected,
    Disqualified,
}

impl LeadStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Bounced | Self::Unsubscribed | Self::Rejected | Self::Disqualified
        )
    }

    /// States on the social-channel sub-path.
    pub fn is_social(&self) -> bool {
        matches!(
            self,
            Self::SocialSent | Self::SocialConnected | Self::SocialReplied | Self::SocialExhausted
        )
    }

    /// A reply has been received on either channel.
    pub fn has_replied(&self) -> bool {
        matches!(
            self,
            Self::Replied | Self::SocialReplied | Self::MeetingBooked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Dispatched => "dispatched",
            Self::Sent => "sent",
            Self::Opened => "opened",
            Self::Replied => "replied",
            Self::MeetingBooked => "meeting_booked",
            Self::Ghosted => "ghosted",
            Self::Stalled => "stalled",
            Self::EngagedNotReplied => "engaged_not_replied",
            Self::SocialSent => "social_sent",
            Self::SocialConnected => "social_connected",
            Self::SocialReplied => "social_replied",
            Self::SocialExhausted => "social_exhausted",
            Self::Bounced => "bounced",
            Self::Unsubscribed => "unsubscribed",
            Self::Rejected => "rejected",
            Self::Disqualified => "disqualified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "dispatched" => Some(Self::Dispatched),
            "sent" => Some(Self::Sent),
            "opened" => Some(Self::Opened),
            "replied" => Some(Self::Replied),
            "meeting_booked" => Some(Self::MeetingBooked),
            "ghosted" => Some(Self::Ghosted),
            "stalled" => Some(Self::Stalled),
            "engaged_not_replied" => Some(Self::EngagedNotReplied),
            "social_sent" => Some(Self::SocialSent),
            "social_connected" => Some(Self::SocialConnected),
            "social_replied" => Some(Self::SocialReplied),
            "social_exhausted" => Some(Self::SocialExhausted),
            "bounced" => Some(Self::Bounced),
            "unsubscribed" => Some(Self::Unsubscribed),
            "rejected" => Some(Self::Rejected),
            "disqualified" => Some(Self::Disqualified),
            _ => None,
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator dispositions — manual transitions with no webhook counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Approve,
    MeetingBooked,
    Reject,
    Disqualify,
}

/// Time windows that drive the decay sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayWindows {
    /// No open within this many days after send → `ghosted`.
    pub ghost_days: u32,
    /// Opened but no reply within this many days → `stalled`.
    pub stall_days: u32,
    /// No social connect/reply within this many days → `social_exhausted`.
    pub social_exhaust_days: u32,
}

impl Default for DecayWindows {
    fn default() -> Self {
        Self {
            ghost_days: 4,
            stall_days: 7,
            social_exhaust_days: 10,
        }
    }
}

/// Input to the transition function.
#[derive(Debug, Clone, Copy)]
pub enum AdvanceInput {
    /// An inbound engagement event.
    Event(SignalKind),
    /// Observed by the decay sweep: time since last activity plus the
    /// lead's open/reply counts from the event log.
    Elapsed {
        since_last_activity: Duration,
        opens: u32,
        replies: u32,
    },
}

/// The transition function. Pure; returns the current status unchanged when
/// no transition applies (including every input against a terminal status).
pub fn advance(current: LeadStatus, input: AdvanceInput, windows: &DecayWindows) -> LeadStatus {
    if current.is_terminal() {
        return current;
    }

    match input {
        AdvanceInput::Event(kind) => advance_on_event(current, kind),
        AdvanceInput::Elapsed {
            since_last_activity,
            opens,
            replies,
        } => advance_on_elapsed(current, since_last_activity, opens, replies, windows),
    }
}

fn advance_on_event(current: LeadStatus, kind: SignalKind) -> LeadStatus {
    use LeadStatus::*;

    match kind {
        // Terminal events apply from any non-terminal state.
        SignalKind::Bounced => Bounced,
        SignalKind::Unsubscribed => Unsubscribed,

        SignalKind::Delivered => match current {
            Dispatched => Sent,
            other => other,
        },

        SignalKind::Opened => match current {
            Sent | Ghosted => Opened,
            // A second open with no reply yet.
            Opened | Stalled => EngagedNotReplied,
            other => other,
        },

        SignalKind::Replied => match current {
            Dispatched | Sent | Opened | Ghosted | Stalled | EngagedNotReplied => Replied,
            other => other,
        },

        SignalKind::SocialConnected => match current {
            SocialSent => SocialConnected,
            other => other,
        },

        SignalKind::SocialReplied => match current {
            SocialSent | SocialConnected => SocialReplied,
            other => other,
        },
    }
}

fn advance_on_elapsed(
    current: LeadStatus,
    elapsed: Duration,
    opens: u32,
    replies: u32,
    windows: &DecayWindows,
) -> LeadStatus {
    use LeadStatus::*;

    match current {
        Sent if opens == 0 && elapsed >= Duration::days(windows.ghost_days as i64) => Ghosted,
        Opened | Stalled if opens >= 2 && replies == 0 => EngagedNotReplied,
        Opened if replies == 0 && elapsed >= Duration::days(windows.stall_days as i64) => Stalled,
        SocialSent | SocialConnected
            if elapsed >= Duration::days(windows.social_exhaust_days as i64) =>
        {
            SocialExhausted
        }
        other => other,
    }
}

/// Apply an operator disposition. Terminal states absorb these too.
pub fn apply_disposition(current: LeadStatus, disposition: Disposition) -> LeadStatus {
    use LeadStatus::*;

    if current.is_terminal() {
        return current;
    }

    match disposition {
        Disposition::Approve => match current {
            Pending => Approved,
            other => other,
        },
        Disposition::MeetingBooked => match current {
            Replied | SocialReplied => MeetingBooked,
            other => other,
        },
        Disposition::Reject => Rejected,
        Disposition::Disqualify => Disqualified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS: DecayWindows = DecayWindows {
        ghost_days: 4,
        stall_days: 7,
        social_exhaust_days: 10,
    };

    fn event(current: LeadStatus, kind: SignalKind) -> LeadStatus {
        advance(current, AdvanceInput::Event(kind), &WINDOWS)
    }

    #[test]
    fn happy_path() {
        assert_eq!(
            event(LeadStatus::Dispatched, SignalKind::Delivered),
            LeadStatus::Sent
        );
        assert_eq!(
            event(LeadStatus::Sent, SignalKind::Opened),
            LeadStatus::Opened
        );
        assert_eq!(
            event(LeadStatus::Opened, SignalKind::Replied),
            LeadStatus::Replied
        );
        assert_eq!(
            apply_disposition(LeadStatus::Replied, Disposition::MeetingBooked),
            LeadStatus::MeetingBooked
        );
    }

    #[test]
    fn terminal_states_absorb_events() {
        for terminal in [
            LeadStatus::Bounced,
            LeadStatus::Unsubscribed,
            LeadStatus::Rejected,
            LeadStatus::Disqualified,
        ] {
            assert_eq!(event(terminal, SignalKind::Opened), terminal);
            assert_eq!(event(terminal, SignalKind::Replied), terminal);
            assert_eq!(event(terminal, SignalKind::Bounced), terminal);
            assert_eq!(
                apply_disposition(terminal, Disposition::Disqualify),
                terminal
            );
        }
    }

    #[test]
    fn bounce_applies_from_any_active_state() {
        for state in [
            LeadStatus::Sent,
            LeadStatus::Opened,
            LeadStatus::Ghosted,
            LeadStatus::SocialSent,
        ] {
            assert_eq!(event(state, SignalKind::Bounced), LeadStatus::Bounced);
        }
    }

    #[test]
    fn second_open_becomes_engaged_not_replied() {
        let after_first = event(LeadStatus::Sent, SignalKind::Opened);
        assert_eq!(after_first, LeadStatus::Opened);
        let after_second = event(after_first, SignalKind::Opened);
        assert_eq!(after_second, LeadStatus::EngagedNotReplied);
    }

    #[test]
    fn reply_wins_from_lateral_states() {
        assert_eq!(
            event(LeadStatus::Ghosted, SignalKind::Replied),
            LeadStatus::Replied
        );
        assert_eq!(
            event(LeadStatus::Stalled, SignalKind::Replied),
            LeadStatus::Replied
        );
        assert_eq!(
            event(LeadStatus::EngagedNotReplied, SignalKind::Replied),
            LeadStatus::Replied
        );
    }

    #[test]
    fn social_sub_path() {
        assert_eq!(
            event(LeadStatus::SocialSent, SignalKind::SocialConnected),
            LeadStatus::SocialConnected
        );
        assert_eq!(
            event(LeadStatus::SocialConnected, SignalKind::SocialReplied),
            LeadStatus::SocialReplied
        );
        // Reply can skip the connect step.
        assert_eq!(
            event(LeadStatus::SocialSent, SignalKind::SocialReplied),
            LeadStatus::SocialReplied
        );
        // Email-path events don't touch social states.
        assert_eq!(
            event(LeadStatus::SocialSent, SignalKind::Opened),
            LeadStatus::SocialSent
        );
    }

    #[test]
    fn ghost_sweep_requires_window_and_zero_opens() {
        let short = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(2),
            opens: 0,
            replies: 0,
        };
        assert_eq!(advance(LeadStatus::Sent, short, &WINDOWS), LeadStatus::Sent);

        let long = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(5),
            opens: 0,
            replies: 0,
        };
        assert_eq!(
            advance(LeadStatus::Sent, long, &WINDOWS),
            LeadStatus::Ghosted
        );

        // An open that arrived before the sweep blocks ghosting.
        let long_with_open = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(5),
            opens: 1,
            replies: 0,
        };
        assert_eq!(
            advance(LeadStatus::Sent, long_with_open, &WINDOWS),
            LeadStatus::Sent
        );
    }

    #[test]
    fn stall_sweep() {
        let input = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(8),
            opens: 1,
            replies: 0,
        };
        assert_eq!(
            advance(LeadStatus::Opened, input, &WINDOWS),
            LeadStatus::Stalled
        );
    }

    #[test]
    fn sweep_detects_engaged_not_replied_without_new_event() {
        let input = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(1),
            opens: 3,
            replies: 0,
        };
        assert_eq!(
            advance(LeadStatus::Opened, input, &WINDOWS),
            LeadStatus::EngagedNotReplied
        );
    }

    #[test]
    fn social_exhaust_sweep() {
        let input = AdvanceInput::Elapsed {
            since_last_activity: Duration::days(11),
            opens: 0,
            replies: 0,
        };
        assert_eq!(
            advance(LeadStatus::SocialSent, input, &WINDOWS),
            LeadStatus::SocialExhausted
        );
        assert_eq!(
            advance(LeadStatus::SocialConnected, input, &WINDOWS),
            LeadStatus::SocialExhausted
        );
    }

    #[test]
    fn disposition_gating() {
        assert_eq!(
            apply_disposition(LeadStatus::Pending, Disposition::Approve),
            LeadStatus::Approved
        );
        // MeetingBooked only from a replied state.
        assert_eq!(
            apply_disposition(LeadStatus::Sent, Disposition::MeetingBooked),
            LeadStatus::Sent
        );
        assert_eq!(
            apply_disposition(LeadStatus::Opened, Disposition::Reject),
            LeadStatus::Rejected
        );
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            LeadStatus::Pending,
            LeadStatus::EngagedNotReplied,
            LeadStatus::SocialExhausted,
            LeadStatus::MeetingBooked,
            LeadStatus::Disqualified,
        ] {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeadStatus::parse("unknown"), None);
    }
}
