use crate::core::DayState;
use crate::rename::rename_paths_in_day_state;
use crate::storage::day_store::same_state;
use std::collections::{BTreeMap, BTreeSet};

/// Pending days grouped by owning month.
pub(crate) type MonthBatches = BTreeMap<String, BTreeMap<String, DayState>>;

/// Reentrant write barrier.
///
/// While `depth > 0` persists are recorded here instead of being written. Only
/// the last snapshot per date survives.
#[derive(Debug, Default)]
pub(crate) struct WriteBarrier {
    depth: usize,
    pending_months: BTreeSet<String>,
    pending_days: BTreeMap<String, DayState>,
}

impl WriteBarrier {
    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn enter(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Returns the new depth, or `None` if no barrier was open.
    pub(crate) fn exit(&mut self) -> Option<usize> {
        self.depth = self.depth.checked_sub(1)?;
        Some(self.depth)
    }

    pub(crate) fn record(&mut self, month_key: String, date_key: String, snapshot: DayState) {
        self.pending_months.insert(month_key);
        self.pending_days.insert(date_key, snapshot);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending_days.is_empty()
    }

    pub(crate) fn pending_dates(&self) -> Vec<String> {
        self.pending_days.keys().cloned().collect()
    }

    /// Copies of every pending snapshot, grouped by month.
    pub(crate) fn batches(&self) -> MonthBatches {
        let mut batches = MonthBatches::new();
        for month_key in &self.pending_months {
            let prefix = format!("{}-", month_key);
            let days: BTreeMap<String, DayState> = self
                .pending_days
                .range(prefix.clone()..)
                .take_while(|(date_key, _)| date_key.starts_with(&prefix))
                .map(|(date_key, state)| (date_key.clone(), state.clone()))
                .collect();
            if !days.is_empty() {
                batches.insert(month_key.clone(), days);
            }
        }
        batches
    }

    /// Drops the pending entry for `date_key` if it still equals the flushed snapshot.
    /// A snapshot recorded after the flush started stays pending.
    pub(crate) fn settle(&mut self, date_key: &str, flushed: &DayState) -> bool {
        let unchanged = self
            .pending_days
            .get(date_key)
            .is_some_and(|pending| same_state(pending, flushed));
        if unchanged {
            self.pending_days.remove(date_key);
            self.prune_months();
        }
        unchanged
    }

    pub(crate) fn rename_paths(&mut self, old_path: &str, new_path: &str) {
        for snapshot in self.pending_days.values_mut() {
            rename_paths_in_day_state(snapshot, old_path, new_path);
        }
    }

    fn prune_months(&mut self) {
        let days = &self.pending_days;
        self.pending_months.retain(|month_key| {
            let prefix = format!("{}-", month_key);
            days.range(prefix.clone()..)
                .next()
                .is_some_and(|(date_key, _)| date_key.starts_with(&prefix))
        });
    }
}
