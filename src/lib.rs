// ============================================================================
// daystate: per-day overlay state with conflict-free merging
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod merge;
pub mod rename;
pub mod storage;

// Re-export main types for convenience
pub use cache::DayStateCache;
pub use config::DayStateConfig;
pub use core::{
    DayState, DayStateError, DayStatePatch, DeletedInstance, DeletionType, DuplicatedInstance,
    EpochMillis, HiddenRoutine, MonthMetadata, MonthlyDayStateFile, OrderMeta, Result,
    SlotOverrideMeta,
};
pub use merge::{
    DayMergeOutcome, DeletedInfo, MergeOutcome, get_effective_deleted_at, is_deleted, is_hidden,
    is_legacy_deletion_entry, merge_day_states, merge_deleted_instances,
    merge_duplicated_instances, merge_hidden_routines, merge_orders, merge_slot_overrides,
};
pub use rename::{rename_paths_in_day_state, rename_paths_in_monthly_state};
pub use storage::{
    DayStatePersistence, DocumentStore, FsDocumentStore, MemoryDocumentStore, MonthMergeReport,
    PersistentDayStore,
};
