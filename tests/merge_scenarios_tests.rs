use daystate::{
    DayState, DeletedInfo, DeletedInstance, DuplicatedInstance, HiddenRoutine, OrderMeta,
    SlotOverrideMeta, is_deleted, is_hidden, merge_day_states, merge_deleted_instances,
    merge_duplicated_instances, merge_orders, merge_slot_overrides,
};
use std::collections::BTreeMap;

fn sorted_json<T: serde::Serialize>(entries: &[T]) -> Vec<String> {
    let mut out: Vec<String> = entries
        .iter()
        .map(|entry| serde_json::to_string(entry).unwrap())
        .collect();
    out.sort();
    out
}

fn with_instance_id(mut entry: DeletedInstance, instance_id: &str) -> DeletedInstance {
    entry.instance_id = Some(instance_id.to_string());
    entry
}

fn device_one() -> Vec<DeletedInstance> {
    vec![
        with_instance_id(DeletedInstance::permanent("W.md").with_deleted_at(40), "w-1"),
        DeletedInstance::permanent("X.md").with_deleted_at(100),
        DeletedInstance::temporary("a", "R.md").with_deleted_at(300),
        DeletedInstance::permanent("Y.md")
            .with_task_id("task-y")
            .with_deleted_at(50)
            .with_restored_at(60),
    ]
}

fn device_two() -> Vec<DeletedInstance> {
    vec![
        DeletedInstance::permanent("W.md").with_deleted_at(40),
        DeletedInstance::permanent("X.md")
            .with_deleted_at(100)
            .with_restored_at(200),
        DeletedInstance::temporary("b", "R.md").with_deleted_at(310),
        DeletedInstance::permanent("Y-renamed.md")
            .with_task_id("task-y")
            .with_deleted_at(70),
    ]
}

#[test]
fn deleted_merge_is_idempotent() {
    let entries = device_one();
    let outcome = merge_deleted_instances(&entries, &entries);
    assert_eq!(sorted_json(&outcome.merged), sorted_json(&entries));
    assert!(!outcome.has_conflicts);
    assert_eq!(outcome.conflict_count, 0);
}

#[test]
fn deleted_merge_is_commutative() {
    let ab = merge_deleted_instances(&device_one(), &device_two());
    let ba = merge_deleted_instances(&device_two(), &device_one());
    assert_eq!(sorted_json(&ab.merged), sorted_json(&ba.merged));
    assert_eq!(ab.conflict_count, ba.conflict_count);
}

#[test]
fn restore_outranks_older_deletion() {
    let local = vec![DeletedInstance::permanent("X.md").with_deleted_at(1000)];
    let remote = vec![
        DeletedInstance::permanent("X.md")
            .with_deleted_at(1000)
            .with_restored_at(2000),
    ];
    let outcome = merge_deleted_instances(&local, &remote);
    assert_eq!(outcome.merged.len(), 1);
    assert!(!is_deleted(&outcome.merged[0]));
}

#[test]
fn simultaneous_delete_and_restore_stays_deleted() {
    let entry = DeletedInstance::permanent("X.md")
        .with_deleted_at(1000)
        .with_restored_at(1000);
    assert!(is_deleted(&entry));
}

#[test]
fn instance_scoped_deletions_never_collapse() {
    let local = vec![DeletedInstance::temporary("a", "R.md").with_deleted_at(1)];
    let remote = vec![DeletedInstance::temporary("b", "R.md").with_deleted_at(1)];
    let outcome = merge_deleted_instances(&local, &remote);
    assert_eq!(outcome.merged.len(), 2);
}

#[test]
fn concurrent_delete_and_restore_converges_in_either_order() {
    let device_1 = vec![DeletedInstance::permanent("X.md").with_deleted_at(100)];
    let device_2 = vec![
        DeletedInstance::permanent("X.md")
            .with_deleted_at(100)
            .with_restored_at(200),
    ];

    for outcome in [
        merge_deleted_instances(&device_1, &device_2),
        merge_deleted_instances(&device_2, &device_1),
    ] {
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].restored_at, Some(200));
        assert!(!is_deleted(&outcome.merged[0]));
    }
}

#[test]
fn duplicate_of_deleted_path_is_suppressed() {
    let local = vec![DuplicatedInstance::new("d1", "X.md")];
    let mut deleted_info = DeletedInfo::default();
    deleted_info.paths.insert("X.md".to_string());

    let outcome = merge_duplicated_instances(&local, &[], &deleted_info);
    assert!(outcome.merged.is_empty());
}

#[test]
fn fresher_order_wins() {
    let local = BTreeMap::from([("a".to_string(), 1.0)]);
    let local_meta = BTreeMap::from([(
        "a".to_string(),
        OrderMeta {
            order: 1.0,
            updated_at: 100,
        },
    )]);
    let remote = BTreeMap::from([("a".to_string(), 5.0)]);
    let remote_meta = BTreeMap::from([(
        "a".to_string(),
        OrderMeta {
            order: 5.0,
            updated_at: 200,
        },
    )]);

    let outcome = merge_orders(&local, &local_meta, &remote, &remote_meta, None);
    assert_eq!(outcome.merged.values.get("a"), Some(&5.0));
    assert!(outcome.has_conflicts);
}

#[test]
fn newer_month_file_does_not_override_stamped_local_order() {
    let local = BTreeMap::from([("a".to_string(), 1.0)]);
    let local_meta = BTreeMap::from([(
        "a".to_string(),
        OrderMeta {
            order: 1.0,
            updated_at: 100,
        },
    )]);
    let remote = BTreeMap::from([("a".to_string(), 9.0)]);

    let outcome = merge_orders(&local, &local_meta, &remote, &BTreeMap::new(), Some(10_000));
    assert_eq!(outcome.merged.values.get("a"), Some(&1.0));
}

#[test]
fn slot_override_tombstone_removes_older_value() {
    let local = BTreeMap::new();
    let local_meta = BTreeMap::from([(
        "A.md".to_string(),
        SlotOverrideMeta {
            slot_key: "evening".to_string(),
            updated_at: 300,
        },
    )]);
    let remote = BTreeMap::from([("A.md".to_string(), "evening".to_string())]);
    let remote_meta = BTreeMap::from([(
        "A.md".to_string(),
        SlotOverrideMeta {
            slot_key: "evening".to_string(),
            updated_at: 200,
        },
    )]);

    let outcome = merge_slot_overrides(&local, &local_meta, &remote, &remote_meta);
    assert!(!outcome.merged.values.contains_key("A.md"));
    assert_eq!(outcome.merged.meta["A.md"].updated_at, 300);
}

#[test]
fn whole_day_merge_converges() {
    let mut laptop = DayState::default();
    laptop
        .hidden_routines
        .push(HiddenRoutine::path_level("Morning.md").with_hidden_at(10));
    laptop.deleted_instances = device_one();
    laptop
        .duplicated_instances
        .push(DuplicatedInstance::new("dup-x", "X.md"));

    let mut phone = DayState::default();
    phone.hidden_routines.push(
        HiddenRoutine::path_level("Morning.md")
            .with_hidden_at(10)
            .with_restored_at(20),
    );
    phone.deleted_instances = device_two();
    phone.orders.insert("Z.md::evening".to_string(), 2.0);

    let ab = merge_day_states(&laptop, &phone, None);
    let ba = merge_day_states(&phone, &laptop, None);

    assert_eq!(
        sorted_json(&ab.state.deleted_instances),
        sorted_json(&ba.state.deleted_instances)
    );
    assert_eq!(
        sorted_json(&ab.state.hidden_routines),
        sorted_json(&ba.state.hidden_routines)
    );
    assert_eq!(ab.state.orders, ba.state.orders);
    assert!(!is_hidden(&ab.state.hidden_routines[0]));
    // X.md was restored, so its duplicate survives.
    assert_eq!(ab.state.duplicated_instances.len(), 1);

    let again = merge_day_states(&ab.state, &ab.state, None);
    assert_eq!(again.state, ab.state);
    assert_eq!(again.conflict_count, 0);
}
