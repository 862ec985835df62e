use daystate::{
    DayState, DayStateConfig, DayStatePatch, DeletedInstance, DeletionType, FsDocumentStore,
    HiddenRoutine, OrderMeta, PersistentDayStore, is_deleted,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn open(root: &Path) -> PersistentDayStore {
    PersistentDayStore::new(
        Arc::new(FsDocumentStore::new(root)),
        DayStateConfig::default(),
    )
}

fn write_month(root: &Path, month_key: &str, content: &Value) {
    let dir = root.join("LOGS");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(format!("{}-state.json", month_key)),
        serde_json::to_string_pretty(content).unwrap(),
    )
    .unwrap();
}

fn read_month(root: &Path, month_key: &str) -> Value {
    let raw = fs::read_to_string(root.join("LOGS").join(format!("{}-state.json", month_key))).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn load_day_creates_month_file() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());

    let state = store.load_day("2024-07-14").await.unwrap();
    assert!(state.is_empty());

    let month = read_month(dir.path(), "2024-07");
    assert_eq!(month["days"]["2024-07-14"]["hiddenRoutines"], json!([]));
    assert_eq!(month["metadata"]["version"], "1.0");
    assert!(month["metadata"]["lastUpdated"].is_string());
}

#[tokio::test]
async fn legacy_month_file_is_normalized_on_load() {
    let dir = tempdir().unwrap();
    write_month(
        dir.path(),
        "2023-11",
        &json!({
            "days": {
                "2023-11-02": {
                    "hiddenRoutines": ["Gym.md"],
                    "deletedInstances": [{ "path": "Old.md", "timestamp": 1700000000000i64 }],
                    "orders": { "Gym.md::morning": { "order": 4 } }
                }
            }
        }),
    );
    let store = open(dir.path());

    let state = store.load_day("2023-11-02").await.unwrap();
    assert_eq!(state.hidden_routines, vec![HiddenRoutine::path_level("Gym.md")]);
    assert_eq!(state.deleted_instances[0].deletion_type, DeletionType::Permanent);
    assert!(is_deleted(&state.deleted_instances[0]));
    assert_eq!(state.orders.get("Gym.md::morning"), Some(&4.0));
}

#[tokio::test]
async fn malformed_month_file_loads_as_empty() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("LOGS")).unwrap();
    fs::write(dir.path().join("LOGS/2024-01-state.json"), "{ \"days\": [oops").unwrap();
    let store = open(dir.path());

    let state = store.load_day("2024-01-09").await.unwrap();
    assert!(state.is_empty());
}

#[tokio::test]
async fn month_merge_reconciles_with_concurrent_disk_changes() {
    let dir = tempdir().unwrap();
    write_month(
        dir.path(),
        "2024-08",
        &json!({
            "days": {
                "2024-08-01": {
                    "deletedInstances": [
                        { "path": "X.md", "deletionType": "permanent", "deletedAt": 100, "restoredAt": 200 }
                    ]
                },
                "2024-08-02": { "orders": { "Other.md::noon": 7 } }
            },
            "metadata": { "version": "1.0", "lastUpdated": "2024-08-01T12:00:00Z" }
        }),
    );
    let store = open(dir.path());

    let mut local = DayState::default();
    local
        .deleted_instances
        .push(DeletedInstance::permanent("X.md").with_deleted_at(100));
    local.orders.insert("X.md::noon".to_string(), 1.0);
    local.orders_meta.insert(
        "X.md::noon".to_string(),
        OrderMeta {
            order: 1.0,
            updated_at: 150,
        },
    );

    let report = store
        .merge_and_save_month("2024-08", BTreeMap::from([("2024-08-01".to_string(), local)]))
        .await
        .unwrap();
    assert!(report.written);
    assert_eq!(report.conflict_count, 1);

    let merged = &report.days["2024-08-01"];
    assert_eq!(merged.deleted_instances.len(), 1);
    assert!(!is_deleted(&merged.deleted_instances[0]));
    assert_eq!(merged.orders.get("X.md::noon"), Some(&1.0));

    let on_disk = read_month(dir.path(), "2024-08");
    assert_eq!(on_disk["days"]["2024-08-02"]["orders"]["Other.md::noon"], json!(7.0));
    assert_eq!(
        on_disk["days"]["2024-08-01"]["deletedInstances"][0]["restoredAt"],
        json!(200)
    );
}

#[tokio::test]
async fn rename_rewrites_only_months_that_reference_the_path() {
    let dir = tempdir().unwrap();
    write_month(
        dir.path(),
        "2024-09",
        &json!({ "days": { "2024-09-03": { "slotOverrides": { "A.md": "evening" } } } }),
    );
    write_month(
        dir.path(),
        "2024-10",
        &json!({ "days": { "2024-10-01": { "orders": { "C.md::noon": 1 } } } }),
    );
    fs::write(dir.path().join("LOGS/notes.md"), "not a month").unwrap();
    let untouched_before = fs::read_to_string(dir.path().join("LOGS/2024-10-state.json")).unwrap();

    let store = open(dir.path());
    let rewritten = store.rename_task_path("A.md", "Renamed/A.md").await.unwrap();
    assert_eq!(rewritten, 1);

    let month = read_month(dir.path(), "2024-09");
    assert_eq!(
        month["days"]["2024-09-03"]["slotOverrides"]["Renamed/A.md"],
        "evening"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("LOGS/2024-10-state.json")).unwrap(),
        untouched_before
    );

    let state = store.load_day("2024-09-03").await.unwrap();
    assert!(state.slot_overrides.contains_key("Renamed/A.md"));
}

#[tokio::test]
async fn partial_merge_leaves_other_fields_alone() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store
        .update_day("2024-12-24", |state| {
            state.orders.insert("A.md::morning".to_string(), 1.0);
        })
        .await
        .unwrap();

    let patch = DayStatePatch {
        deleted_instances: Some(vec![DeletedInstance::temporary("i-9", "B.md").with_deleted_at(5)]),
        ..DayStatePatch::default()
    };
    let state = store.merge_day_state("2024-12-24", patch).await.unwrap();
    assert_eq!(state.orders.get("A.md::morning"), Some(&1.0));
    assert_eq!(state.deleted_instances.len(), 1);

    store.clear_cache(None).await;
    assert_eq!(store.load_day("2024-12-24").await.unwrap(), state);
}

#[tokio::test]
async fn compact_json_when_pretty_printing_is_off() {
    let dir = tempdir().unwrap();
    let store = PersistentDayStore::new(
        Arc::new(FsDocumentStore::new(dir.path())),
        DayStateConfig::new("state").pretty_json(false),
    );
    store.load_day("2025-02-01").await.unwrap();

    let raw = fs::read_to_string(dir.path().join("state/2025-02-state.json")).unwrap();
    assert!(!raw.contains('\n'));
}
