use std::collections::BTreeSet;
use std::future::Future;

use super::{group, seeded, TestResult};
use crate::record::{EntityKind, RetireMode, UpsertAction};
use crate::InventoryStorage;

pub(super) async fn run_retire_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "retire",
            "soft_retire_hides_but_keeps_record",
            soft_retire_hides_but_keeps_record(factory).await,
        ),
        TestResult::from_result(
            "retire",
            "hard_retire_deletes_record",
            hard_retire_deletes_record(factory).await,
        ),
        TestResult::from_result(
            "retire",
            "retire_spares_other_targets",
            retire_spares_other_targets(factory).await,
        ),
        TestResult::from_result(
            "retire",
            "retire_spares_other_kinds",
            retire_spares_other_kinds(factory).await,
        ),
        TestResult::from_result(
            "retire",
            "reappearing_record_is_reactivated",
            reappearing_record_is_reactivated(factory).await,
        ),
        TestResult::from_result(
            "retire",
            "soft_retire_skips_already_retired",
            soft_retire_skips_already_retired(factory).await,
        ),
    ]
}

fn keep(refs: &[&str]) -> BTreeSet<String> {
    refs.iter().map(|r| r.to_string()).collect()
}

async fn two_groups<S, F, Fut>(factory: &F, target_id: &str) -> Result<S, String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    for (r, name) in [("24", "hello_inventory"), ("25", "other_inventory")] {
        s.upsert_entity(&mut tx, target_id, r, group(name))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    Ok(s)
}

async fn retire<S: InventoryStorage>(
    s: &S,
    target_id: &str,
    kind: EntityKind,
    kept: &[&str],
    mode: RetireMode,
) -> Result<usize, String> {
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let retired = s
        .retire_entities_except(&mut tx, target_id, kind, &keep(kept), mode)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    Ok(retired.len())
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn soft_retire_hides_but_keeps_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t1").await?;
    let n = retire(&s, "t1", EntityKind::InventoryGroup, &["24"], RetireMode::Soft).await?;
    if n != 1 {
        return Err(format!("expected 1 retired, got {}", n));
    }
    let active = s
        .list_entities("t1", EntityKind::InventoryGroup, false)
        .await
        .map_err(|e| e.to_string())?;
    let all = s
        .list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?;
    if active.len() != 1 || active[0].remote_ref != "24" {
        return Err(format!("expected only ref 24 active, got {:?}", active));
    }
    if all.len() != 2 || !all.iter().any(|r| r.remote_ref == "25" && r.retired) {
        return Err(format!("soft-retired record must stay flagged: {:?}", all));
    }
    Ok(())
}

async fn hard_retire_deletes_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t1").await?;
    retire(&s, "t1", EntityKind::InventoryGroup, &["24"], RetireMode::Hard).await?;
    let all = s
        .list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 1 {
        return Err(format!("expected 1 record left, got {}", all.len()));
    }
    Ok(())
}

async fn retire_spares_other_targets<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t2").await?;
    let n = retire(&s, "t1", EntityKind::InventoryGroup, &[], RetireMode::Hard).await?;
    if n != 0 {
        return Err(format!("retiring t1 touched {} records of t2", n));
    }
    let t2 = s
        .list_entities("t2", EntityKind::InventoryGroup, false)
        .await
        .map_err(|e| e.to_string())?;
    if t2.len() != 2 {
        return Err(format!("expected t2 untouched, got {:?}", t2));
    }
    Ok(())
}

async fn retire_spares_other_kinds<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t1").await?;
    retire(&s, "t1", EntityKind::Credential, &[], RetireMode::Hard).await?;
    let groups = s
        .list_entities("t1", EntityKind::InventoryGroup, false)
        .await
        .map_err(|e| e.to_string())?;
    if groups.len() != 2 {
        return Err("retiring credentials touched groups".to_string());
    }
    Ok(())
}

async fn reappearing_record_is_reactivated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t1").await?;
    let before = s
        .list_entities("t1", EntityKind::InventoryGroup, true)
        .await
        .map_err(|e| e.to_string())?;
    retire(&s, "t1", EntityKind::InventoryGroup, &["24"], RetireMode::Soft).await?;

    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let out = s
        .upsert_entity(&mut tx, "t1", "25", group("other_inventory"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;

    if out.action != UpsertAction::Reactivated {
        return Err(format!("expected Reactivated, got {:?}", out.action));
    }
    let original = before
        .iter()
        .find(|r| r.remote_ref == "25")
        .ok_or("seed record missing")?;
    if original.local_id != out.local_id {
        return Err("reactivation must keep the local id".to_string());
    }
    Ok(())
}

async fn soft_retire_skips_already_retired<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = two_groups(factory, "t1").await?;
    retire(&s, "t1", EntityKind::InventoryGroup, &["24"], RetireMode::Soft).await?;
    let n = retire(&s, "t1", EntityKind::InventoryGroup, &["24"], RetireMode::Soft).await?;
    if n != 0 {
        return Err(format!("second soft retire reported {} records", n));
    }
    Ok(())
}
