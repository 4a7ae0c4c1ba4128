//! End-to-end refresh passes against the in-memory store, driven by the
//! Tower 3.2.2 fixture snapshot.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use invsync_refresh::{
    FetchError, InventoryGraph, RefreshOutcome, RefreshWarning, Refresher, RetirementPolicy,
    StaticFetcher,
};
use invsync_snapshot::{InventorySnapshot, RawCredential, RawParentRef};
use invsync_storage::{
    CredentialKind, EntityAttributes, EntityKind, EntityRecord, InventoryStorage, LocalId,
    MemoryStorage, MemoryTransaction, ParentLink, PayloadDraft, RefreshStatusUpdate, RetireMode,
    StaticCounterparts, StorageError, TargetRecord, UpsertOutcome,
};

const HELLO_VM_INSTANCE: &str = "4233080d-7467-de61-76c9-c8307b6e4830";

fn fixture() -> InventorySnapshot {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/tower-3.2.2.json");
    let src = std::fs::read_to_string(path).unwrap();
    invsync_snapshot::from_str(&src).unwrap()
}

fn counterparts() -> StaticCounterparts {
    StaticCounterparts::default().with(HELLO_VM_INSTANCE, "vm-42")
}

async fn setup(
    snapshot: InventorySnapshot,
) -> Refresher<MemoryStorage, StaticFetcher, StaticCounterparts> {
    let storage = MemoryStorage::new();
    storage
        .register_target(TargetRecord::new("tower", "https://tower.example.com/api/v1"))
        .await
        .unwrap();
    Refresher::new(storage, StaticFetcher::new(snapshot), counterparts())
}

async fn all_records<S: InventoryStorage>(storage: &S, target_id: &str) -> Vec<EntityRecord> {
    let mut out = Vec::new();
    for kind in EntityKind::ALL {
        out.extend(storage.list_entities(target_id, kind, true).await.unwrap());
    }
    out
}

async fn graph<S: InventoryStorage>(storage: &S) -> InventoryGraph {
    InventoryGraph::load(storage, "tower").await.unwrap()
}

// ── Fixture scenario ─────────────────────────────────────────────────────────

#[tokio::test]
async fn fixture_scenario() {
    let refresher = setup(fixture()).await;
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok(), "{:?}", report.outcome);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let g = graph(refresher.storage()).await;
    assert_eq!(refresher.storage().list_targets().await.unwrap().len(), 1);
    assert_eq!(g.count(EntityKind::ConfiguredSystem), 2);
    assert_eq!(g.count(EntityKind::ConfigurationScript), 3);
    assert_eq!(g.count(EntityKind::InventoryGroup), 2);
    assert_eq!(g.count(EntityKind::ScriptSource), 7);
    assert_eq!(g.count(EntityKind::ScriptPayload), 139);
    assert_eq!(g.count(EntityKind::Credential), 17);

    // target status
    assert_eq!(g.target.api_version.as_deref(), Some("3.2.2"));
    assert_eq!(g.target.last_refresh_error, None);
    assert!(g.target.last_refresh_at.is_some());
    assert_eq!(g.target.last_snapshot_digest, report.snapshot_digest);

    // hello_vm
    let vm = g.find(EntityKind::ConfiguredSystem, "hello_vm").unwrap();
    let vm_attrs = vm.as_configured_system().unwrap();
    assert_eq!(vm.remote_ref, "24");
    assert_eq!(vm_attrs.virtual_instance_ref.as_deref(), Some(HELLO_VM_INSTANCE));
    assert_eq!(vm_attrs.counterpart.as_ref().map(|c| c.id.as_str()), Some("vm-42"));
    let group = g.inventory_group_of(vm).unwrap();
    assert_eq!(group.attributes.name(), "hello_inventory");
    assert_eq!(group.remote_ref, "24");
    assert_eq!(g.systems_in_group(group).len(), 1);
    let localhost = g.find(EntityKind::ConfiguredSystem, "localhost").unwrap();
    assert_eq!(localhost.as_configured_system().unwrap().counterpart, None);

    // hello_template
    let template = g.find(EntityKind::ConfigurationScript, "hello_template").unwrap();
    let attrs = template.as_configuration_script().unwrap();
    assert_eq!(template.remote_ref, "72");
    assert_eq!(attrs.description, "test job");
    assert!(attrs.survey_spec.is_empty());
    assert!(attrs.variables.is_empty());
    assert_eq!(g.inventory_group_of(template).unwrap().remote_ref, "24");
    let playbook = g.parent_of(template).unwrap();
    assert_eq!(playbook.attributes.name(), "hello_world.yml");
    assert_eq!(g.source_of(playbook).unwrap().remote_ref, "70");

    let creds: Vec<(CredentialKind, &str, Option<&str>)> = g
        .credentials_of(template)
        .into_iter()
        .map(|r| {
            let c = r.as_credential().unwrap();
            (c.kind, c.name.as_str(), c.userid.as_deref())
        })
        .collect();
    assert_eq!(creds.len(), 3);
    assert!(creds.contains(&(CredentialKind::Machine, "hello_machine_cred", Some("admin"))));
    assert!(creds.contains(&(CredentialKind::Amazon, "hello_aws_cred", Some("ABC"))));
    assert!(creds.contains(&(CredentialKind::Network, "hello_network_cred", Some("admin"))));

    // hello_template_with_survey
    let survey = g
        .find(EntityKind::ConfigurationScript, "hello_template_with_survey")
        .unwrap();
    let survey_attrs = survey.as_configuration_script().unwrap();
    assert_eq!(survey.remote_ref, "73");
    assert_eq!(survey_attrs.description, "test job with survey spec");
    assert_eq!(
        survey_attrs.survey_spec["spec"][0]["question_name"],
        json!("example question")
    );

    // workflow hangs off hello_template
    let workflow = g.find(EntityKind::ConfigurationScript, "hello_workflow").unwrap();
    assert_eq!(g.parent_of(workflow).unwrap().local_id, template.local_id);
    assert_eq!(g.children_of(template).len(), 1);

    // hello_repo
    let repo = g.find(EntityKind::ScriptSource, "hello_repo").unwrap();
    assert_eq!(repo.as_script_source().unwrap().description, "");
    let payloads = g.payloads_of(repo);
    assert_eq!(payloads.len(), 61);
    assert!(payloads
        .iter()
        .any(|p| p.attributes.name() == "jboss-standalone/site.yml"));
    let scm = g.credentials_of(repo);
    assert_eq!(scm.len(), 1);
    let scm = scm[0].as_credential().unwrap();
    assert_eq!(scm.kind, CredentialKind::Scm);
    assert_eq!(scm.name, "hello_scm_cred");
    assert_eq!(scm.userid.as_deref(), Some("admin"));
}

#[tokio::test]
async fn credential_extra_attributes_follow_kind_schema() {
    let refresher = setup(fixture()).await;
    refresher.refresh("tower").await.unwrap();
    let g = graph(refresher.storage()).await;

    for record in g.records(EntityKind::Credential) {
        let cred = record.as_credential().unwrap();
        let keys: BTreeSet<&str> = cred.extra.keys().map(String::as_str).collect();
        let schema: BTreeSet<&str> = cred.kind.extra_attributes().iter().copied().collect();
        assert_eq!(keys, schema, "credential {}", cred.name);
        assert!(!cred.extra.contains_key("password"));
    }

    let machine = g.find(EntityKind::Credential, "hello_machine_cred").unwrap();
    let extra = &machine.as_credential().unwrap().extra;
    assert_eq!(extra["become_method"], json!("sudo"));
    assert_eq!(extra["become_username"], json!("root"));

    let plain = g
        .find(EntityKind::Credential, "hello_network_cred_no_authorize")
        .unwrap();
    assert_eq!(plain.as_credential().unwrap().extra["host"], json!(null));
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let refresher = setup(fixture()).await;
    let first = refresher.refresh("tower").await.unwrap();
    let before = all_records(refresher.storage(), "tower").await;

    let second = refresher.refresh("tower").await.unwrap();
    let after = all_records(refresher.storage(), "tower").await;

    assert!(second.is_ok());
    assert_eq!(before, after);
    assert!(!first.unchanged);
    assert!(second.unchanged);
    assert_eq!(first.snapshot_digest, second.snapshot_digest);
    for kind in EntityKind::ALL {
        let stats = second.stats_for(kind);
        assert_eq!(stats.created, 0, "{kind}");
        assert_eq!(stats.updated, 0, "{kind}");
        assert_eq!(stats.retired, 0, "{kind}");
        assert_eq!(stats.unchanged, first.stats_for(kind).created, "{kind}");
    }
}

#[tokio::test]
async fn rename_keeps_local_id() {
    let mut snapshot = fixture();
    let refresher = setup(snapshot.clone()).await;
    refresher.refresh("tower").await.unwrap();
    let before = graph(refresher.storage()).await;
    let id = before.by_remote_ref(EntityKind::InventoryGroup, "24").unwrap().local_id;

    snapshot.inventory_groups[1].name = "renamed_inventory".into();
    refresher.fetcher().set(snapshot);
    let report = refresher.refresh("tower").await.unwrap();
    assert_eq!(report.stats_for(EntityKind::InventoryGroup).updated, 1);

    let after = graph(refresher.storage()).await;
    let renamed = after.find(EntityKind::InventoryGroup, "renamed_inventory").unwrap();
    assert_eq!(renamed.local_id, id);
}

// ── Payload replacement ──────────────────────────────────────────────────────

#[tokio::test]
async fn shrinking_payload_set_leaves_no_orphans() {
    let mut snapshot = fixture();
    let refresher = setup(snapshot.clone()).await;
    refresher.refresh("tower").await.unwrap();

    snapshot.script_payloads.retain(|p| {
        p.source_ref != "70" || p.name == "hello_world.yml" || p.name == "jboss-standalone/site.yml"
    });
    refresher.fetcher().set(snapshot);
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());

    let g = graph(refresher.storage()).await;
    let repo = g.find(EntityKind::ScriptSource, "hello_repo").unwrap();
    assert_eq!(g.payloads_of(repo).len(), 2);
    assert_eq!(g.count(EntityKind::ScriptPayload), 139 - 61 + 2);
    let stored = refresher
        .storage()
        .list_entities("tower", EntityKind::ScriptPayload, true)
        .await
        .unwrap();
    assert_eq!(stored.len(), 80, "payloads are hard-deleted");

    // the template still points at its playbook
    let template = g.find(EntityKind::ConfigurationScript, "hello_template").unwrap();
    assert_eq!(g.parent_of(template).unwrap().attributes.name(), "hello_world.yml");
}

// ── Retirement ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn vanished_records_are_retired_and_can_return() {
    let full = fixture();
    let refresher = setup(full.clone()).await;
    refresher.refresh("tower").await.unwrap();
    let before = graph(refresher.storage()).await;
    let old_vm = before.find(EntityKind::ConfiguredSystem, "localhost").unwrap().local_id;

    let mut shrunk = full.clone();
    shrunk.configured_systems.retain(|s| s.remote_ref != "1");
    shrunk.credentials.retain(|c| c.remote_ref != "17");
    shrunk.script_sources.retain(|s| s.remote_ref != "77");
    shrunk.script_payloads.retain(|p| p.source_ref != "77");
    refresher.fetcher().set(shrunk);
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());
    assert_eq!(report.stats_for(EntityKind::ConfiguredSystem).retired, 1);
    assert_eq!(report.stats_for(EntityKind::Credential).retired, 1);
    assert_eq!(report.stats_for(EntityKind::ScriptSource).retired, 1);

    let g = graph(refresher.storage()).await;
    assert_eq!(g.count(EntityKind::ConfiguredSystem), 1);
    assert_eq!(g.count(EntityKind::Credential), 16);
    assert_eq!(g.count(EntityKind::ScriptSource), 6);
    assert_eq!(g.count(EntityKind::ScriptPayload), 129);

    let storage = refresher.storage();
    let systems = storage
        .list_entities("tower", EntityKind::ConfiguredSystem, true)
        .await
        .unwrap();
    assert!(systems.iter().any(|s| s.remote_ref == "1" && s.retired));
    let payloads = storage
        .list_entities("tower", EntityKind::ScriptPayload, true)
        .await
        .unwrap();
    assert_eq!(payloads.len(), 129, "retired source keeps no payloads");

    refresher.fetcher().set(full);
    let report = refresher.refresh("tower").await.unwrap();
    assert_eq!(report.stats_for(EntityKind::ConfiguredSystem).reactivated, 1);
    let g = graph(refresher.storage()).await;
    assert_eq!(
        g.find(EntityKind::ConfiguredSystem, "localhost").unwrap().local_id,
        old_vm
    );
    assert_eq!(g.count(EntityKind::ScriptPayload), 139);
}

#[tokio::test]
async fn retirement_mode_is_configurable() {
    let full = fixture();
    let storage = MemoryStorage::new();
    storage
        .register_target(TargetRecord::new("tower", "https://tower.example.com"))
        .await
        .unwrap();
    let refresher = Refresher::new(storage, StaticFetcher::new(full.clone()), counterparts())
        .with_retirement(
            RetirementPolicy::default().with(EntityKind::ConfiguredSystem, RetireMode::Hard),
        );
    refresher.refresh("tower").await.unwrap();

    let mut shrunk = full;
    shrunk.configured_systems.retain(|s| s.remote_ref != "1");
    refresher.fetcher().set(shrunk);
    refresher.refresh("tower").await.unwrap();

    let systems = refresher
        .storage()
        .list_entities("tower", EntityKind::ConfiguredSystem, true)
        .await
        .unwrap();
    assert_eq!(systems.len(), 1);
}

#[tokio::test]
async fn retirement_never_touches_other_targets() {
    let storage = MemoryStorage::new();
    for id in ["tower", "other"] {
        storage
            .register_target(TargetRecord::new(id, "https://tower.example.com"))
            .await
            .unwrap();
    }
    let tower = Refresher::new(storage.clone(), StaticFetcher::new(fixture()), counterparts());
    let other = Refresher::new(storage.clone(), StaticFetcher::new(fixture()), counterparts());
    tower.refresh("tower").await.unwrap();
    other.refresh("other").await.unwrap();
    let other_before = all_records(&storage, "other").await;

    tower.fetcher().set(InventorySnapshot::default());
    let report = tower.refresh("tower").await.unwrap();
    assert!(report.is_ok());

    let g = graph(&storage).await;
    for kind in EntityKind::ALL {
        assert_eq!(g.count(kind), 0, "{kind} still active on tower");
    }
    assert_eq!(all_records(&storage, "other").await, other_before);
}

#[tokio::test]
async fn refreshing_another_target_does_not_break_an_open_stage() {
    let storage = MemoryStorage::new();
    for id in ["tower", "other"] {
        storage
            .register_target(TargetRecord::new(id, "https://tower.example.com"))
            .await
            .unwrap();
    }
    let mut tx = storage.begin_transaction().await.unwrap();
    storage
        .upsert_entity(
            &mut tx,
            "tower",
            "24",
            EntityAttributes::InventoryGroup(invsync_storage::InventoryGroupAttrs {
                name: "hello_inventory".to_string(),
            }),
        )
        .await
        .unwrap();

    let other = Refresher::new(storage.clone(), StaticFetcher::new(fixture()), counterparts());
    let report = other.refresh("other").await.unwrap();
    assert!(report.is_ok(), "{:?}", report.outcome);

    storage.commit_transaction(tx).await.unwrap();
    assert_eq!(
        storage
            .list_entities("tower", EntityKind::InventoryGroup, false)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        storage
            .list_entities("other", EntityKind::InventoryGroup, false)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn targets_refresh_side_by_side() {
    let storage = MemoryStorage::new();
    for id in ["tower", "other"] {
        storage
            .register_target(TargetRecord::new(id, "https://tower.example.com"))
            .await
            .unwrap();
    }
    let tower = Refresher::new(storage.clone(), StaticFetcher::new(fixture()), counterparts());
    let other = Refresher::new(storage.clone(), StaticFetcher::new(fixture()), counterparts());

    let (a, b) = tokio::join!(tower.refresh("tower"), other.refresh("other"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_ok(), "{:?}", a.outcome);
    assert!(b.is_ok(), "{:?}", b.outcome);

    for id in ["tower", "other"] {
        let g = InventoryGraph::load(&storage, id).await.unwrap();
        assert_eq!(g.count(EntityKind::ScriptPayload), 139, "{id}");
        assert_eq!(g.target.last_refresh_error, None, "{id}");
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_credential_kind_is_a_warning_not_a_failure() {
    let mut snapshot = fixture();
    snapshot.credentials.push(RawCredential {
        remote_ref: "18".into(),
        name: "hello_insights_cred".into(),
        userid: None,
        kind: "insights".into(),
        fields: Default::default(),
    });
    let refresher = setup(snapshot).await;
    let report = refresher.refresh("tower").await.unwrap();

    assert!(report.is_ok());
    assert_eq!(report.classification_warnings().count(), 1);
    assert_eq!(report.stats_for(EntityKind::Credential).skipped, 1);
    let g = graph(refresher.storage()).await;
    assert_eq!(g.count(EntityKind::Credential), 17);
    assert!(g.find(EntityKind::Credential, "hello_insights_cred").is_none());
}

// ── Relationship gaps ────────────────────────────────────────────────────────

#[tokio::test]
async fn dangling_and_cyclic_parents_are_gaps() {
    let mut snapshot = fixture();
    let mut a = snapshot.configuration_scripts[2].clone();
    a.remote_ref = "91".into();
    a.name = "cycle_a".into();
    a.parent = Some(RawParentRef::Script("92".into()));
    let mut b = a.clone();
    b.remote_ref = "92".into();
    b.name = "cycle_b".into();
    b.parent = Some(RawParentRef::Script("91".into()));
    let mut dangling = a.clone();
    dangling.remote_ref = "93".into();
    dangling.name = "dangling".into();
    dangling.parent = Some(RawParentRef::Script("404".into()));
    snapshot.configuration_scripts.extend([a, b, dangling]);

    let refresher = setup(snapshot).await;
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());
    let gaps: Vec<&RefreshWarning> = report.gaps().collect();
    assert_eq!(gaps.len(), 2, "{gaps:?}");

    let g = graph(refresher.storage()).await;
    let a = g.find(EntityKind::ConfigurationScript, "cycle_a").unwrap();
    let b = g.find(EntityKind::ConfigurationScript, "cycle_b").unwrap();
    assert_eq!(
        a.as_configuration_script().unwrap().parent,
        Some(ParentLink::Script(b.local_id))
    );
    assert_eq!(b.as_configuration_script().unwrap().parent, None);
    let dangling = g.find(EntityKind::ConfigurationScript, "dangling").unwrap();
    assert_eq!(dangling.as_configuration_script().unwrap().parent, None);

    // every parent left set resolves to an active record
    for script in g.records(EntityKind::ConfigurationScript) {
        if script.as_configuration_script().unwrap().parent.is_some() {
            assert!(g.parent_of(script).is_some(), "{}", script.remote_ref);
        }
    }
}

#[tokio::test]
async fn missing_inventory_and_credential_refs_are_gaps() {
    let mut snapshot = fixture();
    snapshot.configured_systems[0].inventory_ref = Some("999".into());
    snapshot.configuration_scripts[0]
        .credential_refs
        .push("999".into());
    let refresher = setup(snapshot).await;
    let report = refresher.refresh("tower").await.unwrap();

    assert!(report.is_ok());
    assert_eq!(report.gaps().count(), 2);
    let g = graph(refresher.storage()).await;
    let localhost = g.find(EntityKind::ConfiguredSystem, "localhost").unwrap();
    assert!(g.inventory_group_of(localhost).is_none());
    let template = g.find(EntityKind::ConfigurationScript, "hello_template").unwrap();
    assert_eq!(g.credentials_of(template).len(), 3);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_failure_is_recorded_and_cleared_by_next_success() {
    let refresher = setup(fixture()).await;
    refresher.refresh("tower").await.unwrap();
    let before = all_records(refresher.storage(), "tower").await;

    refresher
        .fetcher()
        .fail_with(FetchError::Network("connection refused".into()));
    let report = refresher.refresh("tower").await.unwrap();
    assert!(!report.is_ok());
    assert!(report.failure_reason().unwrap().contains("connection refused"));

    let target = refresher.storage().get_target("tower").await.unwrap();
    assert!(target
        .last_refresh_error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(target.api_version.as_deref(), Some("3.2.2"));
    assert_eq!(all_records(refresher.storage(), "tower").await, before);

    refresher.fetcher().set(fixture());
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());
    assert!(!report.unchanged, "a failed pass in between is not unchanged");
    let target = refresher.storage().get_target("tower").await.unwrap();
    assert_eq!(target.last_refresh_error, None);
}

#[tokio::test]
async fn unknown_target_is_an_error() {
    let refresher = setup(fixture()).await;
    let err = refresher.refresh("nope").await.unwrap_err();
    assert!(err.to_string().contains("nope"));
}

/// Memory store that fails every upsert of one kind.
#[derive(Clone)]
struct FailingStorage {
    inner: MemoryStorage,
    fail_kind: Arc<Mutex<Option<EntityKind>>>,
}

#[async_trait]
impl InventoryStorage for FailingStorage {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> Result<MemoryTransaction, StorageError> {
        self.inner.begin_transaction().await
    }
    async fn commit_transaction(&self, tx: MemoryTransaction) -> Result<(), StorageError> {
        self.inner.commit_transaction(tx).await
    }
    async fn abort_transaction(&self, tx: MemoryTransaction) -> Result<(), StorageError> {
        self.inner.abort_transaction(tx).await
    }
    async fn register_target(&self, target: TargetRecord) -> Result<(), StorageError> {
        self.inner.register_target(target).await
    }
    async fn get_target(&self, target_id: &str) -> Result<TargetRecord, StorageError> {
        self.inner.get_target(target_id).await
    }
    async fn list_targets(&self) -> Result<Vec<TargetRecord>, StorageError> {
        self.inner.list_targets().await
    }
    async fn write_refresh_status(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        update: RefreshStatusUpdate,
    ) -> Result<(), StorageError> {
        self.inner.write_refresh_status(tx, target_id, update).await
    }
    async fn find_entity(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        kind: EntityKind,
        remote_ref: &str,
    ) -> Result<Option<EntityRecord>, StorageError> {
        self.inner.find_entity(tx, target_id, kind, remote_ref).await
    }
    async fn upsert_entity(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        remote_ref: &str,
        attributes: EntityAttributes,
    ) -> Result<UpsertOutcome, StorageError> {
        if *self.fail_kind.lock().unwrap() == Some(attributes.kind()) {
            return Err(StorageError::Backend("injected failure".into()));
        }
        self.inner
            .upsert_entity(tx, target_id, remote_ref, attributes)
            .await
    }
    async fn retire_entities_except(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        kind: EntityKind,
        keep: &BTreeSet<String>,
        mode: RetireMode,
    ) -> Result<Vec<LocalId>, StorageError> {
        self.inner
            .retire_entities_except(tx, target_id, kind, keep, mode)
            .await
    }
    async fn replace_payloads(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        source: LocalId,
        payloads: Vec<PayloadDraft>,
    ) -> Result<Vec<LocalId>, StorageError> {
        self.inner
            .replace_payloads(tx, target_id, source, payloads)
            .await
    }
    async fn list_entities(
        &self,
        target_id: &str,
        kind: EntityKind,
        include_retired: bool,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        self.inner.list_entities(target_id, kind, include_retired).await
    }
}

#[tokio::test]
async fn storage_failure_keeps_earlier_stages_and_skips_retirement() {
    let storage = FailingStorage {
        inner: MemoryStorage::new(),
        fail_kind: Arc::new(Mutex::new(None)),
    };
    storage
        .register_target(TargetRecord::new("tower", "https://tower.example.com"))
        .await
        .unwrap();
    let full = fixture();
    let refresher = Refresher::new(storage.clone(), StaticFetcher::new(full.clone()), counterparts());
    refresher.refresh("tower").await.unwrap();

    // drop a group and a credential, rename a source, then break the systems stage
    let mut next = full;
    next.inventory_groups.retain(|g| g.remote_ref != "1");
    next.credentials.retain(|c| c.remote_ref != "17");
    next.script_sources[0].name = "Demo Project (renamed)".into();
    refresher.fetcher().set(next);
    *storage.fail_kind.lock().unwrap() = Some(EntityKind::ConfiguredSystem);

    let report = refresher.refresh("tower").await.unwrap();
    assert_eq!(
        report.outcome,
        RefreshOutcome::Failed {
            reason: "configured systems stage failed: storage backend error: injected failure"
                .into()
        }
    );

    let g = graph(&storage).await;
    // earlier stages committed
    assert!(g.find(EntityKind::ScriptSource, "Demo Project (renamed)").is_some());
    // retirement skipped
    assert_eq!(g.count(EntityKind::InventoryGroup), 2);
    assert_eq!(g.count(EntityKind::Credential), 17);
    assert!(g
        .target
        .last_refresh_error
        .as_deref()
        .unwrap()
        .contains("injected failure"));

    *storage.fail_kind.lock().unwrap() = None;
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());
    let g = graph(&storage).await;
    assert_eq!(g.count(EntityKind::InventoryGroup), 1);
    assert_eq!(g.count(EntityKind::Credential), 16);
    assert_eq!(g.target.last_refresh_error, None);
}

#[tokio::test]
async fn classification_warning_skips_only_the_record() {
    let mut snapshot = fixture();
    snapshot.script_payloads.push(invsync_snapshot::RawScriptPayload {
        source_ref: "70".into(),
        name: "roles/requirements.yml".into(),
        kind: "role_requirements".into(),
    });
    let refresher = setup(snapshot).await;
    let report = refresher.refresh("tower").await.unwrap();
    assert!(report.is_ok());
    assert_eq!(report.stats_for(EntityKind::ScriptPayload).skipped, 1);
    assert!(matches!(
        report.warnings.as_slice(),
        [RefreshWarning::Classification { kind: EntityKind::ScriptPayload, .. }]
    ));
    assert_eq!(graph(refresher.storage()).await.count(EntityKind::ScriptPayload), 139);
}
