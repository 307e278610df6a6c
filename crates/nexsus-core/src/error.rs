//! Error taxonomy shared across the pipeline.
//!
//! The split mirrors how failures propagate: `Config` is fatal at sync
//! start and recoverable at query time, `Transient` is retried and
//! observed by circuit breakers, `Rejected` degrades to per-item handling
//! or a DLQ entry, `Integrity` is recorded in-band and never fatal.

use thiserror::Error;

use crate::identity::PointKind;

pub type Result<T> = std::result::Result<T, NexsusError>;

/// Errors from deterministic identity derivation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("model id {0} exceeds the 16-bit namespace group")]
    ModelIdOutOfRange(u32),
    #[error("record id {0} exceeds the 48-bit namespace group")]
    RecordIdOutOfRange(u64),
    #[error("field id {0} exceeds its namespace group")]
    FieldIdOutOfRange(u64),
    #[error("malformed point uuid: {0:?}")]
    Malformed(String),
    #[error("uuid {uuid:?} is not in the {expected} namespace")]
    WrongNamespace { uuid: String, expected: PointKind },
}

#[derive(Debug, Error)]
pub enum NexsusError {
    /// Invalid or missing configuration. Fatal at sync start; query-time
    /// callers may skip the operation instead.
    #[error("config error: {0}")]
    Config(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("field {field} not found on model {model}")]
    FieldNotFound { model: String, field: String },

    /// Network-level failures, 5xx, 429. Retried under backoff.
    #[error("transient failure talking to {service}: {message}")]
    Transient { service: String, message: String },

    /// Provider/store 4xx on a single item or batch.
    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },

    /// FK target missing or unparseable reference. Recorded, never fatal.
    #[error("integrity: {0}")]
    Integrity(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A service breaker is open; fail fast.
    #[error("circuit open for {service} ({remaining_ms}ms until half-open)")]
    CircuitOpen { service: String, remaining_ms: u64 },

    /// Run-scoped cancellation.
    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected invariant violation; aborts the run.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl NexsusError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether the retry policy should re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether a circuit breaker should count this as a service failure.
    ///
    /// Rejections are the caller's fault, not the service's; cancellation
    /// and integrity findings are not service health signals either.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_rejected_is_not() {
        assert!(NexsusError::transient("embedding", "503").is_retryable());
        assert!(!NexsusError::rejected("embedding", "400").is_retryable());
        assert!(!NexsusError::Cancelled.is_retryable());
    }

    #[test]
    fn breaker_counts_only_service_faults() {
        assert!(NexsusError::transient("store", "timeout").counts_against_breaker());
        assert!(!NexsusError::rejected("store", "bad filter").counts_against_breaker());
        assert!(!NexsusError::Cancelled.counts_against_breaker());
        assert!(!NexsusError::Integrity("orphan".into()).counts_against_breaker());
    }
}
