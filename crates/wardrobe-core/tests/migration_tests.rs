//! End-to-end migration runs against the SQLite gateway.
//!
//! `FlakyGateway` wraps a real `SqliteGateway` and injects failures so the
//! orchestrator's skip, fail and abort paths can be observed from outside.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wardrobe_core::migration::LogEvent;
use wardrobe_core::{
    CancellationToken, EntityFields, EntityKind, ErrorKind, LocalLayout, MigrationOptions,
    MigrationOrchestrator, MigrationReport, MigrationState, RemoteGateway, Result, RunOutcome,
    SqliteGateway, StoredAsset, UploadSource, WardrobeError,
};

#[derive(Default)]
struct Faults {
    unreachable: bool,
    failing_sources: HashSet<String>,
    /// Every item insert after this many successful ones reports the remote as gone.
    drop_after_items: Option<usize>,
    inserted_items: usize,
    uploads: usize,
}

struct FlakyGateway {
    inner: SqliteGateway,
    faults: Mutex<Faults>,
}

impl FlakyGateway {
    fn new(inner: SqliteGateway) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    fn with_faults(self, configure: impl FnOnce(&mut Faults)) -> Self {
        configure(&mut self.faults.lock().unwrap());
        self
    }

    fn uploads(&self) -> usize {
        self.faults.lock().unwrap().uploads
    }
}

#[async_trait]
impl RemoteGateway for FlakyGateway {
    async fn ping(&self) -> Result<()> {
        if self.faults.lock().unwrap().unreachable {
            return Err(WardrobeError::RemoteUnreachable {
                message: "connection refused".to_string(),
            });
        }
        self.inner.ping().await
    }

    async fn upload_asset(
        &self,
        upload: &dyn UploadSource,
        destination_hint: &str,
    ) -> Result<StoredAsset> {
        self.faults.lock().unwrap().uploads += 1;
        self.inner.upload_asset(upload, destination_hint).await
    }

    async fn download_asset(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.download_asset(path).await
    }

    async fn insert_entity(&self, kind: EntityKind, fields: EntityFields) -> Result<EntityFields> {
        if kind == EntityKind::Item {
            let mut faults = self.faults.lock().unwrap();
            let source = fields
                .get("source_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if faults.failing_sources.contains(source) {
                return Err(WardrobeError::Upstream {
                    operation: "insert item".to_string(),
                    message: "row rejected".to_string(),
                    status: Some(422),
                    retryable: false,
                });
            }
            if faults
                .drop_after_items
                .is_some_and(|limit| faults.inserted_items >= limit)
            {
                return Err(WardrobeError::RemoteUnreachable {
                    message: "connection reset".to_string(),
                });
            }
            faults.inserted_items += 1;
        }
        self.inner.insert_entity(kind, fields).await
    }

    async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityFields>> {
        self.inner.get_entity(kind, id).await
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<bool> {
        self.inner.delete_entity(kind, id).await
    }

    async fn query_by_owner_and_category(
        &self,
        owner_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<EntityFields>> {
        self.inner.query_by_owner_and_category(owner_id, category).await
    }
}

/// Local data root with `items` and `outfits` written as the app stores them.
struct Fixture {
    temp_dir: TempDir,
    layout: LocalLayout,
}

impl Fixture {
    fn new(items: Value, outfits: Value) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = LocalLayout::new(temp_dir.path().join("data"));
        std::fs::create_dir_all(layout.images_dir()).unwrap();
        std::fs::write(layout.items_path(), serde_json::to_vec_pretty(&items).unwrap()).unwrap();
        std::fs::write(
            layout.outfits_path(),
            serde_json::to_vec_pretty(&outfits).unwrap(),
        )
        .unwrap();
        Self { temp_dir, layout }
    }

    fn add_asset(&self, relative: &str, bytes: &[u8]) {
        let path = self.layout.images_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn remote(&self) -> SqliteGateway {
        SqliteGateway::in_memory(self.temp_dir.path().join("remote-assets")).unwrap()
    }

    fn report_path(&self) -> std::path::PathBuf {
        self.layout.default_report_path()
    }

    fn options(&self) -> MigrationOptions {
        MigrationOptions::new("u1", self.report_path()).with_concurrency(2)
    }

    async fn run(
        &self,
        gateway: Arc<dyn RemoteGateway>,
        options: MigrationOptions,
    ) -> MigrationReport {
        MigrationOrchestrator::new(gateway, self.layout.clone(), options)
            .run()
            .await
            .expect("run should produce a report")
    }
}

fn item(id: &str, category: &str) -> Value {
    json!({
        "id": id,
        "category": category,
        "image": format!("{}/{}.jpg", category, id),
        "details": {"name": format!("Item {}", id), "color": "blue"},
        "timestamp": "2024-03-01T10:00:00Z"
    })
}

fn outfit(id: &str, name: &str, item_ids: &[&str]) -> Value {
    json!({"id": id, "name": name, "item_ids": item_ids})
}

/// Five items (i2's image missing) and two outfits with one gap each.
fn closet_fixture() -> Fixture {
    let fixture = Fixture::new(
        json!([
            item("i1", "tops"),
            item("i2", "tops"),
            item("i3", "bottoms"),
            item("i4", "shoes"),
            item("i5", "outerwear"),
        ]),
        json!([
            outfit("o1", "Office", &["i1", "i2"]),
            outfit("o2", "Weekend", &["i1", "i99"]),
        ]),
    );
    for (id, category) in [
        ("i1", "tops"),
        ("i3", "bottoms"),
        ("i4", "shoes"),
        ("i5", "outerwear"),
    ] {
        fixture.add_asset(&format!("{}/{}.jpg", category, id), id.as_bytes());
    }
    fixture
}

fn events(report: &MigrationReport) -> Vec<&LogEvent> {
    report.entries.iter().map(|e| &e.event).collect()
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(dir).unwrap().display().to_string();
            (relative, std::fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_closet_with_missing_image_and_gaps() {
    let fixture = closet_fixture();
    let gateway = Arc::new(fixture.remote());
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    assert_eq!(report.items.total, 5);
    assert_eq!(report.items.migrated, 4);
    assert_eq!(report.items.skipped, 1);
    assert_eq!(report.items.failed, 0);
    assert_eq!(report.outfits.migrated, 2);
    assert_eq!(report.referential_gaps, 2);
    assert!(matches!(report.outcome, RunOutcome::Partial { .. }));
    assert_eq!(report.final_state(), MigrationState::Done);

    assert!(events(&report).iter().any(|e| matches!(
        e,
        LogEvent::ItemSkipped { old_id, kind: ErrorKind::AssetUnavailable, .. } if old_id == "i2"
    )));
    let gaps: Vec<_> = events(&report)
        .into_iter()
        .filter_map(|e| match e {
            LogEvent::ReferentialGap {
                outfit_id,
                missing_item_id,
            } => Some((outfit_id.as_str(), missing_item_id.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(gaps, vec![("o1", "i2"), ("o2", "i99")]);

    assert_eq!(gateway.count(EntityKind::Item).unwrap(), 4);
    assert_eq!(gateway.count(EntityKind::Outfit).unwrap(), 2);

    // Both outfits keep exactly the migrated i1.
    let new_i1 = report.item_mapping.get("i1").unwrap().to_string();
    for old_outfit in ["o1", "o2"] {
        let new_id = report.outfit_mapping.get(old_outfit).unwrap();
        let stored = gateway
            .get_entity(EntityKind::Outfit, new_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["item_ids"], json!([new_i1]));
        assert_eq!(stored["user_id"], "u1");
    }

    let text = std::fs::read_to_string(fixture.report_path()).unwrap();
    assert!(text.contains("Items: 4 migrated, 1 skipped, 0 failed, 0 not attempted (of 5)"));
    assert!(text.contains("i99"));
}

#[tokio::test]
async fn test_migrated_item_fields_and_asset() {
    let fixture = closet_fixture();
    let gateway = Arc::new(fixture.remote());
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    let new_id = report.item_mapping.get("i3").unwrap();
    let stored = gateway
        .get_entity(EntityKind::Item, new_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["user_id"], "u1");
    assert_eq!(stored["category"], "bottoms");
    assert_eq!(stored["name"], "Item i3");
    assert_eq!(stored["color"], "blue");
    assert_eq!(stored["source_id"], "i3");

    let image_path = stored["image_path"].as_str().unwrap();
    assert!(image_path.starts_with("u1/bottoms/"));
    assert_eq!(gateway.download_asset(image_path).await.unwrap(), b"i3");

    let shoes = gateway
        .query_by_owner_and_category("u1", Some("shoes"))
        .await
        .unwrap();
    assert_eq!(shoes.len(), 1);
}

#[tokio::test]
async fn test_outfit_without_migrated_items_is_skipped() {
    let fixture = Fixture::new(
        json!([item("a1", "tops"), item("a2", "shoes"), item("a3", "tops")]),
        json!([
            outfit("full", "Full", &["a1", "a2", "a3"]),
            outfit("lost", "Lost", &["a3"]),
            outfit("empty", "Empty", &[]),
        ]),
    );
    fixture.add_asset("tops/a1.jpg", b"a1");
    fixture.add_asset("shoes/a2.jpg", b"a2");

    let gateway = Arc::new(fixture.remote());
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    assert_eq!(report.items.migrated, 2);
    assert_eq!(report.outfits.migrated, 1);
    assert_eq!(report.outfits.skipped, 2);
    assert_eq!(gateway.count(EntityKind::Outfit).unwrap(), 1);

    let full = gateway
        .get_entity(EntityKind::Outfit, report.outfit_mapping.get("full").unwrap())
        .await
        .unwrap()
        .unwrap();
    let expected = json!([
        report.item_mapping.get("a1").unwrap(),
        report.item_mapping.get("a2").unwrap()
    ]);
    assert_eq!(full["item_ids"], expected);

    assert!(events(&report).iter().any(|e| matches!(
        e,
        LogEvent::OutfitSkipped { old_id, kind: ErrorKind::ReferentialGap, .. } if old_id == "lost"
    )));
    assert!(report.outfit_mapping.get("empty").is_none());
}

#[tokio::test]
async fn test_upstream_failure_is_logged_and_run_continues() {
    let fixture = closet_fixture();
    let gateway = Arc::new(FlakyGateway::new(fixture.remote()).with_faults(|f| {
        f.failing_sources.insert("i3".to_string());
    }));
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    assert_eq!(report.items.migrated, 3);
    assert_eq!(report.items.failed, 1);
    assert_eq!(report.items.skipped, 1);
    assert_eq!(report.outfits.migrated, 2);
    assert!(matches!(report.outcome, RunOutcome::Partial { .. }));
    assert!(events(&report).iter().any(|e| matches!(
        e,
        LogEvent::ItemFailed { old_id, kind: ErrorKind::UpstreamFailure, .. } if old_id == "i3"
    )));
}

#[tokio::test]
async fn test_unreachable_remote_fails_run_before_uploading() {
    let fixture = closet_fixture();
    let gateway = Arc::new(FlakyGateway::new(fixture.remote()).with_faults(|f| f.unreachable = true));
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    match &report.outcome {
        RunOutcome::Failed { state, .. } => assert_eq!(*state, MigrationState::MigrateItems),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.final_state(), MigrationState::Failed);
    assert_eq!(report.items.migrated, 0);
    assert_eq!(gateway.uploads(), 0);
    assert!(matches!(report.backup, wardrobe_core::migration::BackupSummary::Created { .. }));

    let text = std::fs::read_to_string(fixture.report_path()).unwrap();
    assert!(text.contains("Outcome:"));
    assert!(text.contains("Migration failed in"));
}

#[tokio::test]
async fn test_remote_lost_mid_run_stops_new_items() {
    let fixture = closet_fixture();
    let gateway = Arc::new(
        FlakyGateway::new(fixture.remote()).with_faults(|f| f.drop_after_items = Some(1)),
    );
    let options = MigrationOptions::new("u1", fixture.report_path()).with_concurrency(1);
    let report = fixture.run(gateway, options).await;

    assert!(report.outcome.is_failed());
    assert_eq!(report.items.migrated, 1);
    assert_eq!(report.items.failed, 1);
    // i2 is skipped locally before the remote is lost; i4 and i5 never start.
    assert_eq!(report.items.not_attempted, 2);
    assert_eq!(report.outfits.migrated, 0);
    assert!(report.item_mapping.get("i1").is_some());
}

#[tokio::test]
async fn test_cancelled_run_records_not_attempted() {
    let fixture = closet_fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let orchestrator = MigrationOrchestrator::new(
        Arc::new(fixture.remote()),
        fixture.layout.clone(),
        fixture.options(),
    )
    .with_cancellation(cancel);
    let report = orchestrator.run().await.unwrap();

    assert!(report.outcome.is_failed());
    assert_eq!(report.items.migrated, 0);
    assert!(fixture.report_path().exists());
}

#[tokio::test]
async fn test_local_source_is_untouched() {
    let fixture = closet_fixture();
    let before = snapshot(&fixture.layout.images_dir());

    let report = fixture.run(Arc::new(fixture.remote()), fixture.options()).await;
    assert_eq!(report.items.migrated, 4);

    assert_eq!(snapshot(&fixture.layout.images_dir()), before);
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_remote_rows() {
    let fixture = closet_fixture();
    let gateway = Arc::new(fixture.remote());

    let first = fixture.run(gateway.clone(), fixture.options().with_backup(false)).await;
    let second = fixture.run(gateway.clone(), fixture.options().with_backup(false)).await;

    assert_eq!(gateway.count(EntityKind::Item).unwrap(), 4);
    assert_eq!(gateway.count(EntityKind::Outfit).unwrap(), 2);
    assert_eq!(first.item_mapping.get("i1"), second.item_mapping.get("i1"));
    assert_eq!(first.outfit_mapping.get("o2"), second.outfit_mapping.get("o2"));

    // One stored object per migrated item, whichever run wrote it last.
    let assets = snapshot(&fixture.temp_dir.path().join("remote-assets"));
    assert_eq!(assets.len(), 4);

    // The re-linked outfit still carries its item.
    let o1 = gateway
        .get_entity(EntityKind::Outfit, second.outfit_mapping.get("o1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(o1["item_ids"], json!([second.item_mapping.get("i1").unwrap()]));
}

#[tokio::test]
async fn test_backup_is_written_before_migration() {
    let fixture = closet_fixture();
    let report = fixture.run(Arc::new(fixture.remote()), fixture.options()).await;

    let location = match &report.backup {
        wardrobe_core::migration::BackupSummary::Created { location, issues } => {
            assert_eq!(*issues, 0);
            location.clone()
        }
        other => panic!("unexpected backup {:?}", other),
    };
    assert!(location.starts_with(fixture.layout.backup_root()));
    assert!(location.join("images/metadata.json").is_file());
    assert!(location.join("images/outfit_metadata.json").is_file());
    assert!(location.join("images/tops/i1.jpg").is_file());
}

#[tokio::test]
async fn test_required_backup_without_backups_is_rejected() {
    let fixture = closet_fixture();
    let options = fixture
        .options()
        .with_backup(false)
        .with_required_backup(true);
    let gateway = Arc::new(FlakyGateway::new(fixture.remote()));

    let report = fixture.run(gateway.clone(), options).await;
    match &report.outcome {
        RunOutcome::Failed { state, .. } => assert_eq!(*state, MigrationState::Backup),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(gateway.uploads(), 0);
    let text = std::fs::read_to_string(fixture.report_path()).unwrap();
    assert!(text.contains("Migration failed in"));
}

#[tokio::test]
async fn test_blank_owner_still_writes_report() {
    let fixture = closet_fixture();
    let options = MigrationOptions::new("  ", fixture.report_path());

    let report = fixture.run(Arc::new(fixture.remote()), options).await;
    assert!(report.outcome.is_failed());
    assert_eq!(report.final_state(), MigrationState::Failed);
    assert_eq!(report.items.migrated, 0);
    assert!(fixture.report_path().is_file());
}

#[tokio::test]
async fn test_successful_run_ends_in_done() {
    let fixture = closet_fixture();
    let report = fixture.run(Arc::new(fixture.remote()), fixture.options()).await;

    let states: Vec<MigrationState> = events(&report)
        .into_iter()
        .filter_map(|e| match e {
            LogEvent::StateEntered { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            MigrationState::Backup,
            MigrationState::MigrateItems,
            MigrationState::MigrateOutfits,
            MigrationState::Report,
            MigrationState::Done,
        ]
    );
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let fixture = Fixture::new(
        json!([
            item("good", "tops"),
            {"id": "nocat", "image": "tops/nocat.jpg"},
            "not an object",
        ]),
        json!([outfit("o1", "", &["good", "nocat"])]),
    );
    fixture.add_asset("tops/good.jpg", b"good");
    fixture.add_asset("tops/nocat.jpg", b"nocat");

    let gateway = Arc::new(fixture.remote());
    let report = fixture.run(gateway.clone(), fixture.options()).await;

    assert_eq!(report.items.total, 3);
    assert_eq!(report.items.migrated, 1);
    assert_eq!(report.items.skipped, 2);
    assert_eq!(report.outfits.migrated, 1);
    assert_eq!(report.referential_gaps, 1);

    let stored = gateway
        .get_entity(EntityKind::Outfit, report.outfit_mapping.get("o1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["name"], "Migrated Outfit o1");
}

#[tokio::test]
async fn test_details_category_drives_remote_category() {
    let fixture = Fixture::new(
        json!([{
            "id": "coat",
            "category": "tops",
            "image": "tops/coat.jpg",
            "details": {"category": "outerwear"}
        }]),
        json!([]),
    );
    fixture.add_asset("tops/coat.jpg", b"coat");

    let gateway = Arc::new(fixture.remote());
    let report = fixture.run(gateway.clone(), fixture.options()).await;
    assert_eq!(report.items.migrated, 1);

    let stored = gateway
        .get_entity(EntityKind::Item, report.item_mapping.get("coat").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["category"], "outerwear");
    assert!(stored["image_path"].as_str().unwrap().starts_with("u1/outerwear/"));
}
