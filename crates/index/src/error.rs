use std::path::PathBuf;
use thiserror::Error;

/// Checkpoint state could not be read or made durable. Fatal for a run:
/// continuing without it would lose resume capability.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist checkpoint {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read run report {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run report {path:?} is not valid: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write run report {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a run. Per-batch store failures never show up here;
/// they are recorded in the run result instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Ingest(#[from] ingest::IngestError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
