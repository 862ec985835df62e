use super::MergeOutcome;
use super::predicates::{deletion_precedence, get_effective_deleted_at, max_opt, non_empty};
use crate::core::DeletedInstance;
use std::cmp::Ordering;

/// Merges two deletion lists.
///
/// Instance-scoped (`temporary`) entries match only on `instanceId`. Every other entry
/// matches on `taskId`, or on `path` when either side lacks a task id (pre-taskId data).
/// Matched entries keep whichever has the newer event; a conflict is counted whenever
/// the two sides disagree on a timestamp.
pub fn merge_deleted_instances(
    local: &[DeletedInstance],
    remote: &[DeletedInstance],
) -> MergeOutcome<Vec<DeletedInstance>> {
    let mut merged: Vec<DeletedInstance> = Vec::with_capacity(local.len() + remote.len());
    let mut conflict_count = 0;

    for incoming in local.iter().chain(remote) {
        match merged
            .iter()
            .position(|existing| deletion_entries_match(existing, incoming))
        {
            Some(idx) => {
                if timestamps_disagree(&merged[idx], incoming) {
                    conflict_count += 1;
                }
                merged[idx] = join_deleted(&merged[idx], incoming);
            }
            None => merged.push(incoming.clone()),
        }
    }

    MergeOutcome::new(merged, conflict_count)
}

pub(crate) fn deletion_entries_match(a: &DeletedInstance, b: &DeletedInstance) -> bool {
    match (a.scoped_instance_id(), b.scoped_instance_id()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => match (non_empty(&a.task_id), non_empty(&b.task_id)) {
            (Some(x), Some(y)) => x == y,
            _ => matches!(
                (non_empty(&a.path), non_empty(&b.path)),
                (Some(x), Some(y)) if x == y
            ),
        },
        _ => false,
    }
}

fn timestamps_disagree(a: &DeletedInstance, b: &DeletedInstance) -> bool {
    get_effective_deleted_at(a) != get_effective_deleted_at(b) || a.restored_at != b.restored_at
}

fn join_deleted(existing: &DeletedInstance, incoming: &DeletedInstance) -> DeletedInstance {
    let mut joined = match deletion_precedence(existing).cmp(&deletion_precedence(incoming)) {
        Ordering::Greater => existing.clone(),
        Ordering::Less => incoming.clone(),
        // Every field is resolved symmetrically so argument order never shows through.
        Ordering::Equal => DeletedInstance {
            task_id: max_string(&existing.task_id, &incoming.task_id),
            path: max_string(&existing.path, &incoming.path),
            instance_id: max_string(&existing.instance_id, &incoming.instance_id),
            // Permanent > Temporary: the destructive reading wins a tie.
            deletion_type: existing.deletion_type.max(incoming.deletion_type),
            deleted_at: max_opt(existing.deleted_at, incoming.deleted_at),
            restored_at: max_opt(existing.restored_at, incoming.restored_at),
            timestamp: max_opt(existing.timestamp, incoming.timestamp),
        },
    };

    // A path-matched legacy entry must not lose the task id the other side knows.
    if non_empty(&joined.task_id).is_none() {
        joined.task_id = non_empty(&existing.task_id)
            .or(non_empty(&incoming.task_id))
            .map(str::to_string);
    }
    if non_empty(&joined.path).is_none() {
        joined.path = non_empty(&existing.path)
            .or(non_empty(&incoming.path))
            .map(str::to_string);
    }
    joined
}

fn max_string(a: &Option<String>, b: &Option<String>) -> Option<String> {
    match (non_empty(a), non_empty(b)) {
        (Some(x), Some(y)) => Some(x.max(y).to_string()),
        (x, y) => x.or(y).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeletionType;
    use crate::merge::is_deleted;

    fn sorted(mut entries: Vec<DeletedInstance>) -> Vec<String> {
        entries.sort_by_key(|e| serde_json::to_string(e).unwrap());
        entries
            .into_iter()
            .map(|e| serde_json::to_string(&e).unwrap())
            .collect()
    }

    #[test]
    fn test_merge_with_self_is_identity() {
        let list = vec![
            DeletedInstance::permanent("A.md").with_deleted_at(10),
            DeletedInstance::temporary("a-1", "B.md").with_deleted_at(20),
            DeletedInstance::permanent("C.md")
                .with_task_id("tc-c")
                .with_deleted_at(5)
                .with_restored_at(9),
        ];
        let outcome = merge_deleted_instances(&list, &list);
        assert_eq!(sorted(outcome.merged), sorted(list));
        assert!(!outcome.has_conflicts);
        assert_eq!(outcome.conflict_count, 0);
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = vec![
            DeletedInstance::permanent("X.md").with_deleted_at(100),
            DeletedInstance::temporary("i-1", "Y.md").with_deleted_at(50),
        ];
        let b = vec![
            DeletedInstance::permanent("X.md")
                .with_deleted_at(100)
                .with_restored_at(200),
            DeletedInstance::temporary("i-2", "Y.md").with_deleted_at(70),
            DeletedInstance::permanent("Z.md").with_deleted_at(1),
        ];
        let ab = merge_deleted_instances(&a, &b);
        let ba = merge_deleted_instances(&b, &a);
        assert_eq!(sorted(ab.merged), sorted(ba.merged));
        assert_eq!(ab.conflict_count, ba.conflict_count);
    }

    #[test]
    fn test_tie_resolves_instance_id_regardless_of_order() {
        let mut with_id = DeletedInstance::permanent("X.md").with_deleted_at(10);
        with_id.instance_id = Some("i1".to_string());
        let without_id = DeletedInstance::permanent("X.md").with_deleted_at(10);

        let ab = merge_deleted_instances(&[with_id.clone()], &[without_id.clone()]);
        let ba = merge_deleted_instances(&[without_id], &[with_id]);
        assert_eq!(ab.merged, ba.merged);
        assert_eq!(ab.merged[0].instance_id.as_deref(), Some("i1"));
        assert_eq!(ab.conflict_count, 0);
    }

    #[test]
    fn test_restore_beats_older_delete_in_either_order() {
        let device1 = vec![DeletedInstance::permanent("X.md").with_deleted_at(100)];
        let device2 = vec![
            DeletedInstance::permanent("X.md")
                .with_deleted_at(100)
                .with_restored_at(200),
        ];

        for outcome in [
            merge_deleted_instances(&device1, &device2),
            merge_deleted_instances(&device2, &device1),
        ] {
            assert_eq!(outcome.merged.len(), 1);
            assert_eq!(outcome.merged[0].restored_at, Some(200));
            assert!(!is_deleted(&outcome.merged[0]));
            assert!(outcome.has_conflicts);
        }
    }

    #[test]
    fn test_temporary_deletions_stay_instance_scoped() {
        let local = vec![
            DeletedInstance::temporary("a", "R.md")
                .with_task_id("tc-r")
                .with_deleted_at(1),
        ];
        let remote = vec![
            DeletedInstance::temporary("b", "R.md")
                .with_task_id("tc-r")
                .with_deleted_at(1),
        ];
        let outcome = merge_deleted_instances(&local, &remote);
        assert_eq!(outcome.merged.len(), 2);
        assert_eq!(outcome.conflict_count, 0);
    }

    #[test]
    fn test_legacy_path_entry_matches_task_entry() {
        let local = vec![DeletedInstance::permanent("X.md").with_deleted_at(100)];
        let remote = vec![
            DeletedInstance::permanent("X.md")
                .with_task_id("tc-x")
                .with_deleted_at(300),
        ];
        let outcome = merge_deleted_instances(&local, &remote);
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].task_id.as_deref(), Some("tc-x"));
        assert_eq!(outcome.merged[0].deleted_at, Some(300));
    }

    #[test]
    fn test_tie_widens_timestamps_and_prefers_permanent() {
        let local = vec![DeletedInstance::permanent("X.md").with_deleted_at(200)];
        let mut remote_entry = DeletedInstance::permanent("X.md")
            .with_deleted_at(100)
            .with_restored_at(200);
        remote_entry.deletion_type = DeletionType::Temporary;
        let outcome = merge_deleted_instances(&local, &[remote_entry]);

        assert_eq!(outcome.merged.len(), 1);
        let entry = &outcome.merged[0];
        assert_eq!(entry.deleted_at, Some(200));
        assert_eq!(entry.restored_at, Some(200));
        assert_eq!(entry.deletion_type, DeletionType::Permanent);
        assert!(is_deleted(entry));
    }

    #[test]
    fn test_redelete_after_restore_wins() {
        let local = vec![DeletedInstance::permanent("X.md").with_deleted_at(300)];
        let remote = vec![
            DeletedInstance::permanent("X.md")
                .with_deleted_at(100)
                .with_restored_at(200),
        ];
        let outcome = merge_deleted_instances(&local, &remote);
        assert!(is_deleted(&outcome.merged[0]));
        assert_eq!(outcome.merged[0].restored_at, None);
    }
}
