//! Snapshot fetchers.
//!
//! A [`SnapshotFetcher`] turns a target into an [`InventorySnapshot`]. The
//! HTTP implementation lives in [`crate::http`]; this module holds the trait
//! and the fetchers that do not talk to a remote.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use invsync_snapshot::InventorySnapshot;
use invsync_storage::TargetRecord;

use crate::error::FetchError;

#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch and validate the current remote inventory of `target`.
    async fn fetch_snapshot(&self, target: &TargetRecord)
        -> Result<InventorySnapshot, FetchError>;
}

/// Reads a snapshot document from disk on every fetch.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotFetcher for FileFetcher {
    async fn fetch_snapshot(
        &self,
        _target: &TargetRecord,
    ) -> Result<InventorySnapshot, FetchError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FetchError::Unavailable(format!("'{}': {}", self.path.display(), e))
        })?;
        Ok(invsync_snapshot::from_str(&content)?)
    }
}

/// Serves whatever snapshot (or failure) it was last given.
#[derive(Debug)]
pub struct StaticFetcher {
    next: Mutex<Result<InventorySnapshot, FetchError>>,
}

impl StaticFetcher {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            next: Mutex::new(Ok(snapshot)),
        }
    }

    pub fn set(&self, snapshot: InventorySnapshot) {
        self.replace(Ok(snapshot));
    }

    pub fn fail_with(&self, error: FetchError) {
        self.replace(Err(error));
    }

    fn replace(&self, next: Result<InventorySnapshot, FetchError>) {
        match self.next.lock() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[async_trait]
impl SnapshotFetcher for StaticFetcher {
    async fn fetch_snapshot(
        &self,
        _target: &TargetRecord,
    ) -> Result<InventorySnapshot, FetchError> {
        let next = match self.next.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let snapshot = next?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
