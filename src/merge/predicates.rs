use crate::core::{DeletedInstance, EpochMillis, HiddenRoutine};

/// Deletion time of an entry, falling back to the legacy `timestamp` field.
pub fn get_effective_deleted_at(entry: &DeletedInstance) -> Option<EpochMillis> {
    entry.deleted_at.or(entry.timestamp)
}

/// Entries written before tombstones existed carry neither `deletedAt` nor `restoredAt`.
pub fn is_legacy_deletion_entry(entry: &DeletedInstance) -> bool {
    entry.deleted_at.is_none() && entry.restored_at.is_none()
}

/// An entry is deleted unless it carries a restore strictly newer than its deletion.
/// Ties favor the deletion.
pub fn is_deleted(entry: &DeletedInstance) -> bool {
    match entry.restored_at {
        None => true,
        Some(restored_at) => get_effective_deleted_at(entry).is_some_and(|at| at >= restored_at),
    }
}

pub fn is_hidden(entry: &HiddenRoutine) -> bool {
    match entry.restored_at {
        None => true,
        Some(restored_at) => entry.hidden_at.is_some_and(|at| at >= restored_at),
    }
}

/// Most recent event on a deletion entry; the merge keeps the entry with the larger value.
pub(crate) fn deletion_precedence(entry: &DeletedInstance) -> EpochMillis {
    get_effective_deleted_at(entry)
        .unwrap_or(0)
        .max(entry.restored_at.unwrap_or(0))
}

pub(crate) fn hidden_precedence(entry: &HiddenRoutine) -> EpochMillis {
    entry.hidden_at.unwrap_or(0).max(entry.restored_at.unwrap_or(0))
}

pub(crate) fn max_opt(a: Option<EpochMillis>, b: Option<EpochMillis>) -> Option<EpochMillis> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
