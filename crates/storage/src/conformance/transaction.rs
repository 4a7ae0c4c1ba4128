use std::future::Future;

use super::{group, seeded, TestResult};
use crate::record::EntityKind;
use crate::InventoryStorage;

pub(super) async fn run_transaction_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "transaction",
            "uncommitted_writes_are_invisible",
            uncommitted_writes_are_invisible(factory).await,
        ),
        TestResult::from_result(
            "transaction",
            "abort_discards_writes",
            abort_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "transaction",
            "dropped_transaction_discards_writes",
            dropped_transaction_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "transaction",
            "committed_stage_survives_later_abort",
            committed_stage_survives_later_abort(factory).await,
        ),
        TestResult::from_result(
            "transaction",
            "other_target_commit_does_not_conflict",
            other_target_commit_does_not_conflict(factory).await,
        ),
    ]
}

async fn group_count<S: InventoryStorage>(s: &S) -> Result<usize, String> {
    Ok(s.list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?
        .len())
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn uncommitted_writes_are_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut tx, "t1", "24", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    let seen = group_count(&s).await?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    if seen != 0 {
        return Err(format!("uncommitted record visible ({} rows)", seen));
    }
    if group_count(&s).await? != 1 {
        return Err("committed record not visible".to_string());
    }
    Ok(())
}

async fn abort_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut tx, "t1", "24", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_transaction(tx).await.map_err(|e| e.to_string())?;
    if group_count(&s).await? != 0 {
        return Err("aborted write is visible".to_string());
    }
    Ok(())
}

async fn dropped_transaction_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    {
        let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
        s.upsert_entity(&mut tx, "t1", "24", group("g"))
            .await
            .map_err(|e| e.to_string())?;
    }
    if group_count(&s).await? != 0 {
        return Err("dropped transaction's write is visible".to_string());
    }
    Ok(())
}

async fn committed_stage_survives_later_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut tx, "t1", "24", group("first"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut tx, "t1", "25", group("second"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_transaction(tx).await.map_err(|e| e.to_string())?;

    let all = s
        .list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 1 || all[0].attributes.name() != "first" {
        return Err(format!("expected only the committed record, got {:?}", all));
    }
    Ok(())
}

async fn other_target_commit_does_not_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut open = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut open, "t1", "24", group("on t1"))
        .await
        .map_err(|e| e.to_string())?;

    let mut other = s.begin_transaction().await.map_err(|e| e.to_string())?;
    s.upsert_entity(&mut other, "t2", "24", group("on t2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(other)
        .await
        .map_err(|e| e.to_string())?;

    s.commit_transaction(open)
        .await
        .map_err(|e| format!("commit on t1 failed after a t2 commit: {}", e))?;

    for target in ["t1", "t2"] {
        let rows = s
            .list_entities(target, EntityKind::InventoryGroup, true)
            .await
            .map_err(|e| e.to_string())?;
        if rows.len() != 1 {
            return Err(format!("{} has {} groups, expected 1", target, rows.len()));
        }
    }
    Ok(())
}
