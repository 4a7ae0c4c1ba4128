//! Conformance test suite for `InventoryStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `InventoryStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Targets**: registration, duplicate detection, status writes
//! - **Upsert**: natural-key identity, rename in place, unchanged detection
//! - **Retirement**: soft and hard retirement, target isolation, reactivation
//! - **Payloads**: full replace of a source's children
//! - **Transactions**: uncommitted writes invisible, abort discards
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use invsync_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod payloads;
mod retire;
mod target;
mod transaction;
mod upsert;

use std::fmt;
use std::future::Future;

use serde_json::Map;

use crate::record::{
    ConfigurationScriptAttrs, EntityAttributes, InventoryGroupAttrs, ScriptSourceAttrs,
    TargetRecord,
};
use crate::InventoryStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "target", "upsert", "retire").
    pub category: String,
    /// Test name (e.g. "rename_keeps_local_id").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(target::run_target_tests(&factory).await);
    results.extend(upsert::run_upsert_tests(&factory).await);
    results.extend(retire::run_retire_tests(&factory).await);
    results.extend(payloads::run_payload_tests(&factory).await);
    results.extend(transaction::run_transaction_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Fresh storage with targets `t1` and `t2` registered.
async fn seeded<S, F, Fut>(factory: &F) -> Result<S, String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for id in ["t1", "t2"] {
        s.register_target(TargetRecord::new(id, format!("https://{}.example.com", id)))
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(s)
}

fn group(name: &str) -> EntityAttributes {
    EntityAttributes::InventoryGroup(InventoryGroupAttrs {
        name: name.to_string(),
    })
}

fn source(name: &str) -> EntityAttributes {
    EntityAttributes::ScriptSource(ScriptSourceAttrs {
        name: name.to_string(),
        description: String::new(),
        credential: None,
    })
}

fn script(name: &str) -> EntityAttributes {
    EntityAttributes::ConfigurationScript(ConfigurationScriptAttrs {
        name: name.to_string(),
        description: String::new(),
        variables: Map::new(),
        survey_spec: Map::new(),
        inventory_group: None,
        credentials: Vec::new(),
        parent: None,
    })
}
