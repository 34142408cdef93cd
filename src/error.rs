//! Error types for the dispatch engine.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    #[error("Cadence error: {0}")]
    Cadence(#[from] CadenceError),
}

/// Configuration-related errors. These are fatal at startup: an engine with
/// an incomplete ruleset must refuse to dispatch rather than proceed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Cadence '{cadence}' step {step} references unknown template '{template}'")]
    MissingTemplate {
        cadence: String,
        step: usize,
        template: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound channel errors.
///
/// `Permanent` covers the hard-bounce / invalid-recipient class: the lead is
/// moved to a terminal status and suppressed, never retried. Everything else
/// is transient and feeds the provider's circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to send: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Channel {name} permanently rejected recipient {recipient}: {reason}")]
    Permanent {
        name: String,
        recipient: String,
        reason: String,
    },

    #[error("Channel {name} misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },
}

impl ChannelError {
    /// Permanent failures transition the lead to a terminal status and are
    /// never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. } | Self::Misconfigured { .. })
    }
}

/// Dispatch coordinator errors. Policy rejections are not errors — they
/// are reported as dispatch outcomes; these cover the protective layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Circuit open for provider {provider}, retry after {retry_after:?}")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },

    #[error("Rate limited on provider {provider}: {reason}")]
    RateLimited { provider: String, reason: String },
}

/// Signal ingestion / state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Unknown lead: {0}")]
    UnknownLead(Uuid),
}

/// Cadence scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    #[error("Unknown cadence definition: {0}")]
    UnknownCadence(String),

    #[error("Lead {lead_id} already enrolled in cadence {cadence}")]
    AlreadyEnrolled { lead_id: Uuid, cadence: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
