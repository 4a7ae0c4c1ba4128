//! invsync-refresh: reconciles a remote automation inventory into local
//! storage.
//!
//! A [`Refresher`] fetches an [`InventorySnapshot`](invsync_snapshot::InventorySnapshot)
//! through a [`SnapshotFetcher`], resolves every remote record to a local
//! one, classifies credentials and payloads, rebuilds relationships, retires
//! what disappeared and records the outcome on the target.

pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod http;
pub mod reconcile;
pub mod relationships;
pub mod report;
pub mod resolve;
pub mod retire;

pub use config::{Config, FetchSource};
pub use error::{ConfigError, FetchError, RefreshError};
pub use fetch::{FileFetcher, SnapshotFetcher, StaticFetcher};
pub use graph::InventoryGraph;
pub use http::{HttpSettings, TowerApiFetcher};
pub use reconcile::Refresher;
pub use report::{KindStats, RefreshOutcome, RefreshReport, RefreshWarning};
pub use retire::RetirementPolicy;
