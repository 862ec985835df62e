use super::MergeOutcome;
use super::predicates::{is_deleted, non_empty};
use crate::core::{DeletedInstance, DeletionType, DuplicatedInstance};
use std::collections::{HashMap, HashSet};

/// Identities known to be deleted, used to keep duplicates of deleted things from resurrecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedInfo {
    pub instance_ids: HashSet<String>,
    pub task_ids: HashSet<String>,
    pub paths: HashSet<String>,
}

impl DeletedInfo {
    /// Collects the identities of every currently active deletion.
    pub fn from_deleted(entries: &[DeletedInstance]) -> Self {
        let mut info = Self::default();
        for entry in entries.iter().filter(|entry| is_deleted(entry)) {
            match entry.deletion_type {
                DeletionType::Temporary => {
                    if let Some(id) = entry.scoped_instance_id() {
                        info.instance_ids.insert(id.to_string());
                    }
                }
                DeletionType::Permanent => {
                    if let Some(task_id) = non_empty(&entry.task_id) {
                        info.task_ids.insert(task_id.to_string());
                    }
                    if let Some(path) = non_empty(&entry.path) {
                        info.paths.insert(path.to_string());
                    }
                }
            }
        }
        info
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty() && self.task_ids.is_empty() && self.paths.is_empty()
    }

    pub fn suppresses(&self, duplicate: &DuplicatedInstance) -> bool {
        self.instance_ids.contains(&duplicate.instance_id)
            || self.paths.contains(&duplicate.original_path)
            || non_empty(&duplicate.original_task_id)
                .is_some_and(|task_id| self.task_ids.contains(task_id))
    }
}

/// Deduplicates by `instanceId` (local wins), then drops duplicates of deleted things.
pub fn merge_duplicated_instances(
    local: &[DuplicatedInstance],
    remote: &[DuplicatedInstance],
    deleted_info: &DeletedInfo,
) -> MergeOutcome<Vec<DuplicatedInstance>> {
    let mut merged: Vec<DuplicatedInstance> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut conflict_count = 0;

    for entry in local.iter().chain(remote) {
        match index.get(&entry.instance_id) {
            Some(&idx) => {
                if merged[idx] != *entry {
                    conflict_count += 1;
                }
            }
            None => {
                index.insert(entry.instance_id.clone(), merged.len());
                merged.push(entry.clone());
            }
        }
    }

    merged.retain(|entry| !deleted_info.suppresses(entry));
    MergeOutcome::new(merged, conflict_count)
}
