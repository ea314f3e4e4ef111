use std::path::PathBuf;
use thiserror::Error;

/// An input artifact could not be turned into records.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{artifact}: malformed JSON: {error}")]
    Malformed {
        artifact: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("{artifact}: unrecognized artifact format (tried: {})", .tried.join(", "))]
    Unrecognized {
        artifact: String,
        tried: Vec<&'static str>,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("no recognizable artifacts found under {0:?}")]
    NoArtifacts(PathBuf),
}
