use super::MergeOutcome;
use super::predicates::{hidden_precedence, max_opt, non_empty};
use crate::core::HiddenRoutine;
use std::cmp::Ordering;

/// Merges hidden-routine lists keyed by `path` plus optional `instanceId`.
///
/// Legacy bare-string entries are normalized to `{path, instanceId: null}` when the
/// month file is loaded, so only canonical entries reach this function.
pub fn merge_hidden_routines(
    local: &[HiddenRoutine],
    remote: &[HiddenRoutine],
) -> MergeOutcome<Vec<HiddenRoutine>> {
    let mut merged: Vec<HiddenRoutine> = Vec::with_capacity(local.len() + remote.len());
    let mut conflict_count = 0;

    for incoming in local.iter().chain(remote) {
        match merged
            .iter()
            .position(|existing| hidden_entries_match(existing, incoming))
        {
            Some(idx) => {
                let existing = &merged[idx];
                if existing.hidden_at != incoming.hidden_at
                    || existing.restored_at != incoming.restored_at
                {
                    conflict_count += 1;
                }
                merged[idx] = join_hidden(existing, incoming);
            }
            None => merged.push(incoming.clone()),
        }
    }

    MergeOutcome::new(merged, conflict_count)
}

pub(crate) fn hidden_entries_match(a: &HiddenRoutine, b: &HiddenRoutine) -> bool {
    a.path == b.path && non_empty(&a.instance_id) == non_empty(&b.instance_id)
}

fn join_hidden(existing: &HiddenRoutine, incoming: &HiddenRoutine) -> HiddenRoutine {
    match hidden_precedence(existing).cmp(&hidden_precedence(incoming)) {
        Ordering::Greater => existing.clone(),
        Ordering::Less => incoming.clone(),
        Ordering::Equal => HiddenRoutine {
            path: incoming.path.clone(),
            instance_id: non_empty(&incoming.instance_id).map(str::to_string),
            hidden_at: max_opt(existing.hidden_at, incoming.hidden_at),
            restored_at: max_opt(existing.restored_at, incoming.restored_at),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::is_hidden;

    #[test]
    fn test_path_and_instance_entries_are_distinct() {
        let local = vec![HiddenRoutine::path_level("R.md").with_hidden_at(10)];
        let remote = vec![HiddenRoutine::instance("R.md", "r-1").with_hidden_at(10)];
        let outcome = merge_hidden_routines(&local, &remote);
        assert_eq!(outcome.merged.len(), 2);
        assert!(!outcome.has_conflicts);
    }

    #[test]
    fn test_newer_restore_unhides() {
        let local = vec![HiddenRoutine::path_level("R.md").with_hidden_at(10)];
        let remote = vec![
            HiddenRoutine::path_level("R.md")
                .with_hidden_at(10)
                .with_restored_at(20),
        ];
        let outcome = merge_hidden_routines(&local, &remote);
        assert_eq!(outcome.merged.len(), 1);
        assert!(!is_hidden(&outcome.merged[0]));
        assert_eq!(outcome.conflict_count, 1);

        let reversed = merge_hidden_routines(&remote, &local);
        assert_eq!(reversed.merged, outcome.merged);
    }

    #[test]
    fn test_rehide_after_restore() {
        let local = vec![HiddenRoutine::path_level("R.md").with_hidden_at(30)];
        let remote = vec![
            HiddenRoutine::path_level("R.md")
                .with_hidden_at(10)
                .with_restored_at(20),
        ];
        let outcome = merge_hidden_routines(&local, &remote);
        assert!(is_hidden(&outcome.merged[0]));
    }

    #[test]
    fn test_empty_instance_id_matches_path_level() {
        let mut blank = HiddenRoutine::path_level("R.md").with_hidden_at(5);
        blank.instance_id = Some(String::new());
        let outcome = merge_hidden_routines(&[HiddenRoutine::path_level("R.md").with_hidden_at(5)], &[blank]);
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].instance_id, None);
    }
}
