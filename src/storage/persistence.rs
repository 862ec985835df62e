use crate::core::{DayState, DayStateError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Outcome of one month-merge save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthMergeReport {
    pub month_key: String,
    /// Freshly merged states of the dates that were submitted.
    pub days: BTreeMap<String, DayState>,
    pub conflict_count: usize,
    /// Whether the month file was rewritten. `false` when the merge changed nothing.
    pub written: bool,
}

/// Persistence operations the day-state cache depends on.
#[async_trait]
pub trait DayStatePersistence: Send + Sync {
    /// Returns the stored day, materializing an empty one if the month has none.
    async fn load_day(&self, date_key: &str) -> Result<DayState>;

    /// Overwrites one day with `state`.
    async fn save_day(&self, date_key: &str, state: &DayState) -> Result<()>;

    /// Whether [`merge_and_save_month`](Self::merge_and_save_month) is available.
    fn supports_month_merge(&self) -> bool {
        false
    }

    /// Re-reads the month, merges each submitted day against the stored one, and
    /// writes the result once. Days not submitted are left untouched.
    async fn merge_and_save_month(
        &self,
        month_key: &str,
        _local_days: BTreeMap<String, DayState>,
    ) -> Result<MonthMergeReport> {
        Err(DayStateError::Unsupported(format!(
            "month merge is not available (month {})",
            month_key
        )))
    }

    /// Rewrites every stored reference to `old_path`. Returns the number of months rewritten.
    async fn rename_task_path(&self, old_path: &str, new_path: &str) -> Result<usize>;

    /// Drops cached month data for one month, or all months when `None`.
    async fn clear_cache(&self, month_key: Option<&str>);
}
