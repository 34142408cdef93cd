//! Unified `Database` trait — single async interface for all persistence.
//!
//! Everything durable lives behind this trait: leads, the append-only
//! signal event log, cadence enrollments, circuit state, the suppression
//! list, the audit trail, and the ramp daily-send counter. The daily
//! counter and circuit rows require atomic read-modify-write; nothing here
//! needs cross-entity transactions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cadence::CadenceEnrollment;
use crate::error::DatabaseError;
use crate::leads::Lead;
use crate::limits::ProviderCircuit;
use crate::signals::event::{SignalEvent, SignalKind};
use crate::signals::state::LeadStatus;

/// What an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    GuardRejection,
    RampRejection,
    TerminalTransition,
    EmergencyStop,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuardRejection => "guard_rejection",
            Self::RampRejection => "ramp_rejection",
            Self::TerminalTransition => "terminal_transition",
            Self::EmergencyStop => "emergency_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guard_rejection" => Some(Self::GuardRejection),
            "ramp_rejection" => Some(Self::RampRejection),
            "terminal_transition" => Some(Self::TerminalTransition),
            "emergency_stop" => Some(Self::EmergencyStop),
            _ => None,
        }
    }
}

/// One entry of the operator audit trail. Policy rejections and terminal
/// transitions always land here — rejections are never silent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub lead_id: Option<Uuid>,
    /// The specific rule that fired (guard name, ramp filter, status name).
    pub rule: String,
    pub detail: String,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, lead_id: Option<Uuid>, rule: &str, detail: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
            lead_id,
            rule: rule.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    /// Update a lead's status and last-activity timestamp.
    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
        last_activity_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Leads currently in any of the given statuses (decay sweep input).
    async fn list_leads_with_status(
        &self,
        statuses: &[LeadStatus],
    ) -> Result<Vec<Lead>, DatabaseError>;

    // ── Signal events ───────────────────────────────────────────────

    /// Append an event. Returns `false` when an event with the same
    /// provider event id already exists (at-least-once redelivery).
    async fn insert_signal_event(&self, event: &SignalEvent) -> Result<bool, DatabaseError>;

    async fn count_signal_events(
        &self,
        lead_id: Uuid,
        kind: SignalKind,
    ) -> Result<u32, DatabaseError>;

    async fn list_signal_events(&self, lead_id: Uuid) -> Result<Vec<SignalEvent>, DatabaseError>;

    // ── Cadence enrollments ─────────────────────────────────────────

    async fn insert_enrollment(&self, enrollment: &CadenceEnrollment)
    -> Result<(), DatabaseError>;

    async fn get_enrollment(&self, id: Uuid) -> Result<Option<CadenceEnrollment>, DatabaseError>;

    /// The active enrollment for (lead, cadence), if any. Enforces the
    /// one-active-enrollment rule on the write path.
    async fn get_active_enrollment(
        &self,
        lead_id: Uuid,
        cadence_id: &str,
    ) -> Result<Option<CadenceEnrollment>, DatabaseError>;

    /// Active enrollments whose step is due at or before `now`.
    async fn list_due_enrollments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CadenceEnrollment>, DatabaseError>;

    /// Move an enrollment to its next step.
    async fn advance_enrollment(
        &self,
        id: Uuid,
        step_index: u32,
        due_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Mark an enrollment inactive with an exit reason.
    async fn deactivate_enrollment(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError>;

    // ── Provider circuits ───────────────────────────────────────────

    async fn save_circuit(&self, circuit: &ProviderCircuit) -> Result<(), DatabaseError>;

    async fn list_circuits(&self) -> Result<Vec<ProviderCircuit>, DatabaseError>;

    // ── Ramp daily-send counter ─────────────────────────────────────

    /// Atomically reserve one send for `day` if the counter is below
    /// `ceiling`. Returns `true` when the reservation was made.
    async fn try_reserve_daily_send(
        &self,
        day: NaiveDate,
        ceiling: i64,
    ) -> Result<bool, DatabaseError>;

    async fn daily_sends(&self, day: NaiveDate) -> Result<i64, DatabaseError>;

    // ── Suppression list ────────────────────────────────────────────

    async fn add_suppression(&self, address: &str, reason: &str) -> Result<(), DatabaseError>;

    async fn is_suppressed(&self, address: &str) -> Result<bool, DatabaseError>;

    async fn list_suppressed_addresses(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Audit trail ─────────────────────────────────────────────────

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), DatabaseError>;

    /// Most recent audit rows, newest first.
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, DatabaseError>;
}
