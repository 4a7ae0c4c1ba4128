use std::future::Future;

use super::{seeded, TestResult};
use crate::record::{RefreshStatusUpdate, TargetRecord};
use crate::{InventoryStorage, StorageError};

pub(super) async fn run_target_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "target",
            "registered_target_is_readable",
            registered_target_is_readable(factory).await,
        ),
        TestResult::from_result(
            "target",
            "double_register_is_rejected",
            double_register_is_rejected(factory).await,
        ),
        TestResult::from_result(
            "target",
            "unknown_target_is_not_found",
            unknown_target_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "target",
            "status_write_sets_error_and_version",
            status_write_sets_error_and_version(factory).await,
        ),
        TestResult::from_result(
            "target",
            "failed_status_keeps_previous_version",
            failed_status_keeps_previous_version(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn registered_target_is_readable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let t = s.get_target("t1").await.map_err(|e| e.to_string())?;
    if t.url != "https://t1.example.com" {
        return Err(format!("unexpected url {}", t.url));
    }
    if t.last_refresh_error.is_some() || t.api_version.is_some() {
        return Err("fresh target must carry no refresh status".to_string());
    }
    let all = s.list_targets().await.map_err(|e| e.to_string())?;
    let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
    if ids != ["t1", "t2"] {
        return Err(format!("expected [t1, t2], got {:?}", ids));
    }
    Ok(())
}

async fn double_register_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    match s.register_target(TargetRecord::new("t1", "https://dup")).await {
        Err(StorageError::TargetAlreadyRegistered { target_id }) if target_id == "t1" => Ok(()),
        other => Err(format!("expected TargetAlreadyRegistered, got {:?}", other)),
    }
}

async fn unknown_target_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_target("missing").await {
        Err(StorageError::TargetNotFound { .. }) => Ok(()),
        other => Err(format!("expected TargetNotFound, got {:?}", other)),
    }
}

async fn status_write_sets_error_and_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.write_refresh_status(
        &mut tx,
        "t1",
        RefreshStatusUpdate {
            error: None,
            refreshed_at: "2026-01-01T00:00:00Z".to_string(),
            api_version: Some("3.2.2".to_string()),
            snapshot_digest: Some("abc".to_string()),
        },
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    let t = s.get_target("t1").await.map_err(|e| e.to_string())?;
    if t.api_version.as_deref() != Some("3.2.2") {
        return Err(format!("expected api_version 3.2.2, got {:?}", t.api_version));
    }
    if t.last_refresh_at.as_deref() != Some("2026-01-01T00:00:00Z") {
        return Err(format!("unexpected last_refresh_at {:?}", t.last_refresh_at));
    }
    if t.last_snapshot_digest.as_deref() != Some("abc") {
        return Err("digest not written".to_string());
    }
    Ok(())
}

async fn failed_status_keeps_previous_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    for update in [
        RefreshStatusUpdate {
            error: None,
            refreshed_at: "2026-01-01T00:00:00Z".to_string(),
            api_version: Some("3.2.2".to_string()),
            snapshot_digest: Some("abc".to_string()),
        },
        RefreshStatusUpdate {
            error: Some("connection refused".to_string()),
            refreshed_at: "2026-01-02T00:00:00Z".to_string(),
            api_version: None,
            snapshot_digest: None,
        },
    ] {
        let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
        s.write_refresh_status(&mut tx, "t1", update)
            .await
            .map_err(|e| e.to_string())?;
        s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    }

    let t = s.get_target("t1").await.map_err(|e| e.to_string())?;
    if t.last_refresh_error.as_deref() != Some("connection refused") {
        return Err(format!("expected error to be recorded, got {:?}", t.last_refresh_error));
    }
    if t.api_version.as_deref() != Some("3.2.2") || t.last_snapshot_digest.as_deref() != Some("abc")
    {
        return Err("failed pass must not clear api_version or digest".to_string());
    }
    Ok(())
}
