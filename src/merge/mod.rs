//! Conflict resolution for day overlay state.
//!
//! Every fact is a create/undo timestamp pair; "active" is a pure function of the
//! pair, so merging two copies of a day converges whatever order they arrive in.
//! Nothing here performs I/O.

mod deleted;
mod duplicates;
mod hidden;
mod overrides;
mod predicates;

pub use deleted::merge_deleted_instances;
pub use duplicates::{DeletedInfo, merge_duplicated_instances};
pub use hidden::merge_hidden_routines;
pub use overrides::{
    OrderMerge, SlotOverrideMerge, Stamped, StampedMaps, merge_orders, merge_slot_overrides,
};
pub use predicates::{get_effective_deleted_at, is_deleted, is_hidden, is_legacy_deletion_entry};

pub(crate) use deleted::deletion_entries_match;
pub(crate) use hidden::hidden_entries_match;

use crate::core::{DayState, EpochMillis};

/// Result of merging one overlay field. Conflicts are informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub merged: T,
    pub has_conflicts: bool,
    pub conflict_count: usize,
}

impl<T> MergeOutcome<T> {
    pub fn new(merged: T, conflict_count: usize) -> Self {
        Self {
            merged,
            has_conflicts: conflict_count > 0,
            conflict_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayMergeOutcome {
    pub state: DayState,
    pub conflict_count: usize,
}

/// Merges every field of two copies of the same day.
///
/// Duplicates are filtered against the deletions of the *merged* day, so a deletion
/// arriving from either side suppresses the duplicate on both.
pub fn merge_day_states(
    local: &DayState,
    remote: &DayState,
    remote_month_updated_at: Option<EpochMillis>,
) -> DayMergeOutcome {
    let deleted = merge_deleted_instances(&local.deleted_instances, &remote.deleted_instances);
    let hidden = merge_hidden_routines(&local.hidden_routines, &remote.hidden_routines);
    let slots = merge_slot_overrides(
        &local.slot_overrides,
        &local.slot_overrides_meta,
        &remote.slot_overrides,
        &remote.slot_overrides_meta,
    );
    let orders = merge_orders(
        &local.orders,
        &local.orders_meta,
        &remote.orders,
        &remote.orders_meta,
        remote_month_updated_at,
    );
    let deleted_info = DeletedInfo::from_deleted(&deleted.merged);
    let duplicates = merge_duplicated_instances(
        &local.duplicated_instances,
        &remote.duplicated_instances,
        &deleted_info,
    );

    let conflict_count = deleted.conflict_count
        + hidden.conflict_count
        + slots.conflict_count
        + orders.conflict_count
        + duplicates.conflict_count;

    DayMergeOutcome {
        state: DayState {
            hidden_routines: hidden.merged,
            deleted_instances: deleted.merged,
            duplicated_instances: duplicates.merged,
            slot_overrides: slots.merged.values,
            slot_overrides_meta: slots.merged.meta,
            orders: orders.merged.values,
            orders_meta: orders.merged.meta,
        },
        conflict_count,
    }
}
