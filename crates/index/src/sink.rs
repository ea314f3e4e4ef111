use crate::batch::Batch;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network trouble, timeouts, lock contention: a retry may succeed.
    Transient,
    /// The store rejected the write itself: retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::Transient(m) | StoreError::Permanent(m) => m,
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "neo.transienterror",
    "connection",
    "timed out",
    "timeout",
    "broken pipe",
    "reset by peer",
    "io error",
    "unavailable",
    "deadlock",
    "leader switch",
    "no route to host",
];

/// Classify a store failure by its message. Anything not recognizably
/// transient is treated as permanent so it is never retried blindly.
pub fn classify_message(message: &str) -> StoreError {
    let lowered = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        StoreError::Transient(message.to_string())
    } else {
        StoreError::Permanent(message.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

/// Write side of the target graph store.
///
/// `write_batch` must be all-or-nothing and upsert by id: writing a batch
/// twice leaves the store as if it had been written once.
pub trait GraphSink: Send + Sync {
    fn write_batch(&self, batch: &Batch) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<GraphStats, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(classify_message("IO error: Connection reset by peer").is_transient());
        assert!(classify_message("Neo.TransientError.Transaction.DeadlockDetected").is_transient());
        assert!(classify_message("operation timed out").is_transient());

        let err = classify_message("Neo.ClientError.Schema.ConstraintValidationFailed");
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(err.message(), "Neo.ClientError.Schema.ConstraintValidationFailed");
    }
}
