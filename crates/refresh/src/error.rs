use invsync_snapshot::SnapshotError;
use invsync_storage::StorageError;

/// Errors produced while obtaining a snapshot from a target.
///
/// Any of these aborts the pass before a single entity is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// The remote could not be reached or answered with an unexpected status.
    #[error("network error: {0}")]
    Network(String),
    /// The remote rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The remote answered, but the payload could not be turned into a
    /// valid snapshot.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// A local snapshot source could not be read.
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

impl From<SnapshotError> for FetchError {
    fn from(e: SnapshotError) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

/// Errors that prevent a refresh from producing a report at all.
///
/// Fetch and storage failures inside a pass are recorded on the target and
/// surface as a failed [`RefreshOutcome`](crate::RefreshOutcome) instead;
/// this type covers the cases where even that bookkeeping is impossible.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors loading `invsync.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing config '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}
