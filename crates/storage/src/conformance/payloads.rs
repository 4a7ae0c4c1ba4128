use std::future::Future;

use super::{group, seeded, source, TestResult};
use crate::record::{EntityKind, LocalId, PayloadDraft, PayloadKind};
use crate::{InventoryStorage, StorageError};

pub(super) async fn run_payload_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "payloads",
            "replace_inserts_children",
            replace_inserts_children(factory).await,
        ),
        TestResult::from_result(
            "payloads",
            "shrinking_replace_leaves_no_stragglers",
            shrinking_replace_leaves_no_stragglers(factory).await,
        ),
        TestResult::from_result(
            "payloads",
            "surviving_payload_keeps_its_id",
            surviving_payload_keeps_its_id(factory).await,
        ),
        TestResult::from_result(
            "payloads",
            "replace_spares_sibling_sources",
            replace_spares_sibling_sources(factory).await,
        ),
        TestResult::from_result(
            "payloads",
            "replace_under_non_source_is_rejected",
            replace_under_non_source_is_rejected(factory).await,
        ),
    ]
}

fn drafts(source_ref: &str, names: &[&str]) -> Vec<PayloadDraft> {
    names
        .iter()
        .map(|n| PayloadDraft {
            remote_ref: format!("{}:{}", source_ref, n),
            name: n.to_string(),
            kind: PayloadKind::Playbook,
        })
        .collect()
}

async fn with_source<S: InventoryStorage>(s: &S, source_ref: &str) -> Result<LocalId, String> {
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let out = s
        .upsert_entity(&mut tx, "t1", source_ref, source(source_ref))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    Ok(out.local_id)
}

async fn replace<S: InventoryStorage>(
    s: &S,
    source: LocalId,
    payloads: Vec<PayloadDraft>,
) -> Result<Vec<LocalId>, String> {
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let ids = s
        .replace_payloads(&mut tx, "t1", source, payloads)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_transaction(tx).await.map_err(|e| e.to_string())?;
    Ok(ids)
}

async fn payloads_of<S: InventoryStorage>(s: &S, source: LocalId) -> Result<Vec<String>, String> {
    let all = s
        .list_entities("t1", EntityKind::ScriptPayload, true)
        .await
        .map_err(|e| e.to_string())?;
    Ok(all
        .iter()
        .filter_map(|r| r.as_script_payload())
        .filter(|p| p.source == source)
        .map(|p| p.name.clone())
        .collect())
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn replace_inserts_children<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let src = with_source(&s, "70").await?;
    let ids = replace(&s, src, drafts("70", &["hello_world.yml", "site.yml"])).await?;
    if ids.len() != 2 {
        return Err(format!("expected 2 ids, got {}", ids.len()));
    }
    let names = payloads_of(&s, src).await?;
    if names != ["hello_world.yml", "site.yml"] {
        return Err(format!("unexpected payloads {:?}", names));
    }
    Ok(())
}

async fn shrinking_replace_leaves_no_stragglers<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let src = with_source(&s, "70").await?;
    replace(&s, src, drafts("70", &["a.yml", "b.yml", "c.yml"])).await?;
    replace(&s, src, drafts("70", &["b.yml"])).await?;
    let names = payloads_of(&s, src).await?;
    if names != ["b.yml"] {
        return Err(format!("expected only b.yml, got {:?}", names));
    }
    Ok(())
}

async fn surviving_payload_keeps_its_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let src = with_source(&s, "70").await?;
    let first = replace(&s, src, drafts("70", &["a.yml", "b.yml"])).await?;
    let second = replace(&s, src, drafts("70", &["b.yml", "c.yml"])).await?;
    if second[0] != first[1] {
        return Err(format!(
            "b.yml changed id from {} to {}",
            first[1], second[0]
        ));
    }
    if first.contains(&second[1]) {
        return Err("new payload reused an old id".to_string());
    }
    Ok(())
}

async fn replace_spares_sibling_sources<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let a = with_source(&s, "70").await?;
    let b = with_source(&s, "71").await?;
    replace(&s, a, drafts("70", &["a.yml"])).await?;
    replace(&s, b, drafts("71", &["b1.yml", "b2.yml"])).await?;
    replace(&s, a, Vec::new()).await?;
    if !payloads_of(&s, a).await?.is_empty() {
        return Err("emptied source still has payloads".to_string());
    }
    if payloads_of(&s, b).await?.len() != 2 {
        return Err("replacing one source touched its sibling".to_string());
    }
    Ok(())
}

async fn replace_under_non_source_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: InventoryStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = seeded(factory).await?;
    let mut tx = s.begin_transaction().await.map_err(|e| e.to_string())?;
    let g = s
        .upsert_entity(&mut tx, "t1", "24", group("g"))
        .await
        .map_err(|e| e.to_string())?;
    let result = s
        .replace_payloads(&mut tx, "t1", g.local_id, drafts("24", &["x.yml"]))
        .await;
    s.abort_transaction(tx).await.map_err(|e| e.to_string())?;
    match result {
        Err(StorageError::KindMismatch { .. }) => Ok(()),
        other => Err(format!("expected KindMismatch, got {:?}", other)),
    }
}
