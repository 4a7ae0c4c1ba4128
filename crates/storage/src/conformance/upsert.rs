use std::collections::BTreeSet;
use std::future::Future;

use super::{group, script, seeded, TestResult};
use crate::record::{EntityKind, RetireMode, UpsertAction};
use crate::{InventoryStorage, StorageError};

pub(super) async fn run_upsert_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "upsert",
            "create_is_findable_by_natural_key",
            create_is_findable_by_natural_key(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "rename_keeps_local_id",
            rename_keeps_local_id(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "identical_upsert_is_unchanged",
            identical_upsert_is_unchanged(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "same_ref_other_kind_is_distinct",
            same_ref_other_kind_is_distinct(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "same_ref_other_target_is_distinct",
            same_ref_other_target_is_distinct(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "upsert_for_unknown_target_fails",
            upsert_for_unknown_target_fails(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "ids_are_never_reused",
            ids_are_never_reused(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn create_is_findable_by_natural_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let out = s
        .upsert_entity(&mut tx, "t1", "24", group("hello_inventory"))
        .await
        .map_err(|e| e.to_string())?;
    if out.action != UpsertAction::Created {
        return Err(format!("expected Created, got {:?}", out.action));
    }
    let found = s
        .find_entity(&mut tx, "t1", EntityKind::InventoryGroup, "24")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record not found in its own transaction")?;
    if found.local_id != out.local_id || found.attributes.name() != "hello_inventory" {
        return Err(format!("unexpected record {:?}", found));
    }
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn rename_keeps_local_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let first = s
        .upsert_entity(&mut tx, "t1", "72", script("hello_template"))
        .await
        .map_err(|e| e.to_string())?;
    let second = s
        .upsert_entity(&mut tx, "t1", "72", script("hello_template_renamed"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    if first.local_id != second.local_id {
        return Err(format!(
            "rename changed identity: {} -> {}",
            first.local_id, second.local_id
        ));
    }
    if second.action != UpsertAction::Updated {
        return Err(format!("expected Updated, got {:?}", second.action));
    }
    let all = s
        .list_entities("t1", EntityKind::ConfigurationScript, true)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 1 || all[0].attributes.name() != "hello_template_renamed" {
        return Err(format!("expected one renamed record, got {:?}", all));
    }
    Ok(())
}

async fn identical_upsert_is_unchanged<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let again = s
        .upsert_entity(&mut tx, "t1", "24", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    if again.action != UpsertAction::Unchanged {
        return Err(format!("expected Unchanged, got {:?}", again.action));
    }
    Ok(())
}

async fn same_ref_other_kind_is_distinct<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let a = s
        .upsert_entity(&mut tx, "t1", "24", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    let b = s
        .upsert_entity(&mut tx, "t1", "24", script("s"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    if a.local_id == b.local_id || b.action != UpsertAction::Created {
        return Err("remote refs must be scoped per kind".to_string());
    }
    Ok(())
}

async fn same_ref_other_target_is_distinct<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let a = s
        .upsert_entity(&mut tx, "t1", "24", group("g1"))
        .await
        .map_err(|e| e.to_string())?;
    let b = s
        .upsert_entity(&mut tx, "t2", "24", group("g2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    if a.local_id == b.local_id {
        return Err("remote refs must be scoped per target".to_string());
    }
    let t1 = s
        .list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?;
    if t1.len() != 1 || t1[0].attributes.name() != "g1" {
        return Err(format!("t1 sees foreign records: {:?}", t1));
    }
    Ok(())
}

async fn upsert_for_unknown_target_fails<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let result = s.upsert_entity(&mut tx, "nope", "1", group("g")).await;
    s.abort_transaction(tx).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::TargetNotFound { .. }) => Ok(()),
        other => Err(format!("expected TargetNotFound, got {:?}", other)),
    }
}

async fn ids_are_never_reused<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let first = s
        .upsert_entity(&mut tx, "t1", "1", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    s.retire_entities_except(
        &mut tx,
        "t1",
        EntityKind::InventoryGroup,
        &BTreeSet::new(),
        RetireMode::Hard,
    )
    .await
    .map_err(|e| e.to_string())?;
    let second = s
        .upsert_entity(&mut tx, "t1", "1", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    if second.local_id == first.local_id {
        return Err(format!("id {} handed out twice", first.local_id));
    }
    Ok(())
}
