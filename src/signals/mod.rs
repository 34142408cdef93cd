//! Engagement signals — inbound events, the lead lifecycle state machine,
//! idempotent ingestion, and the decay-detection sweep.

pub mod event;
pub mod ingest;
pub mod state;
pub mod sweep;

pub use event::{SignalEvent, SignalKind};
pub use ingest::{IngestOutcome, SignalProcessor};
pub use state::{DecayWindows, Disposition, LeadStatus};
pub use sweep::DecaySweep;
