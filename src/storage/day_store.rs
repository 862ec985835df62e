use super::document::DocumentStore;
use super::normalize::{normalize_day_state, parse_month};
use super::persistence::{DayStatePersistence, MonthMergeReport};
use crate::config::DayStateConfig;
use crate::core::keys::{month_key_for, validate_month_key};
use crate::core::{DayState, DayStateError, DayStatePatch, MonthlyDayStateFile, Result};
use crate::merge::{
    DeletedInfo, merge_day_states, merge_deleted_instances, merge_duplicated_instances,
    merge_hidden_routines,
};
use crate::rename::rename_paths_in_monthly_state;
use async_trait::async_trait;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

/// Month-file backed day storage.
///
/// Reads are served from a per-month cache. Every write re-reads the month file
/// first, so a change the sync layer made underneath is never overwritten by a
/// stale cached copy.
pub struct PersistentDayStore {
    documents: Arc<dyn DocumentStore>,
    config: DayStateConfig,
    months: Mutex<HashMap<String, MonthlyDayStateFile>>,
}

impl PersistentDayStore {
    pub fn new(documents: Arc<dyn DocumentStore>, config: DayStateConfig) -> Self {
        Self {
            documents,
            config,
            months: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DayStateConfig {
        &self.config
    }

    /// Returns a copy of the stored day, creating and persisting an empty one if needed.
    ///
    /// A failure to persist the materialized day is logged and does not fail the load.
    pub async fn load_day(&self, date_key: &str) -> Result<DayState> {
        let month_key = month_key_for(date_key)?;
        let mut months = self.months.lock().await;

        if let Some(state) = months
            .get(&month_key)
            .and_then(|month| month.days.get(date_key))
        {
            return Ok(state.clone());
        }

        let mut month = self.read_or_create_month(&month_key).await?;
        if !month.days.contains_key(date_key) {
            month.days.insert(date_key.to_string(), DayState::default());
            month.touch();
            if let Err(err) = self.write_month(&month_key, &month).await {
                warn!("failed to persist materialized day {}: {}", date_key, err);
            }
        }

        let state = month.days.get(date_key).cloned().unwrap_or_default();
        months.insert(month_key, month);
        Ok(state)
    }

    /// Read-modify-write of one day. Returns `false` when the stored day was already
    /// identical and nothing was written.
    pub async fn save_day(&self, date_key: &str, state: &DayState) -> Result<bool> {
        let month_key = month_key_for(date_key)?;
        let mut months = self.months.lock().await;

        let mut month = self.read_or_create_month(&month_key).await?;
        let unchanged = month
            .days
            .get(date_key)
            .is_some_and(|stored| same_state(stored, state));
        if unchanged {
            event!(Level::DEBUG, date = %date_key, "skipping no-op day write");
            months.insert(month_key, month);
            return Ok(false);
        }

        month.days.insert(date_key.to_string(), state.clone());
        month.touch();
        match self.write_month(&month_key, &month).await {
            Ok(()) => {
                months.insert(month_key, month);
                Ok(true)
            }
            Err(err) => {
                months.remove(&month_key);
                Err(err)
            }
        }
    }

    /// Loads a day, applies `mutator`, and writes back only if the day changed.
    pub async fn update_day<F>(&self, date_key: &str, mutator: F) -> Result<DayState>
    where
        F: FnOnce(&mut DayState) + Send,
    {
        let mut state = self.load_day(date_key).await?;
        let before = state.clone();
        mutator(&mut state);
        if !same_state(&before, &state) {
            self.save_day(date_key, &state).await?;
        }
        Ok(state)
    }

    /// Unions a partial day into the stored one. Fields absent from `patch` are untouched.
    pub async fn merge_day_state(&self, date_key: &str, patch: DayStatePatch) -> Result<DayState> {
        self.update_day(date_key, move |state| apply_patch(state, patch))
            .await
    }

    /// Merges pending days into the freshly read month and writes it once.
    pub async fn merge_and_save_month(
        &self,
        month_key: &str,
        local_days: BTreeMap<String, DayState>,
    ) -> Result<MonthMergeReport> {
        validate_month_key(month_key)?;
        for date_key in local_days.keys() {
            if month_key_for(date_key)? != month_key {
                return Err(DayStateError::InvalidDateKey(format!(
                    "{} does not belong to month {}",
                    date_key, month_key
                )));
            }
        }

        let span = info_span!(
            "daystate.month.merge",
            month = %month_key,
            days = local_days.len()
        );
        async move {
            let mut months = self.months.lock().await;
            let on_disk = self.read_month_from_disk(month_key).await?;
            let remote_updated_at = on_disk.as_ref().map(MonthlyDayStateFile::last_updated_millis);
            let mut month = on_disk
                .unwrap_or_else(|| MonthlyDayStateFile::with_version(&self.config.format_version));

            let mut report = MonthMergeReport {
                month_key: month_key.to_string(),
                ..MonthMergeReport::default()
            };
            let empty = DayState::default();
            let mut changed = false;
            for (date_key, local) in local_days {
                let stored = month.days.get(&date_key);
                let outcome = merge_day_states(
                    &normalize_day_state(local),
                    stored.unwrap_or(&empty),
                    remote_updated_at,
                );
                report.conflict_count += outcome.conflict_count;
                if stored.is_none_or(|stored| !same_state(stored, &outcome.state)) {
                    changed = true;
                    month.days.insert(date_key.clone(), outcome.state.clone());
                }
                report.days.insert(date_key, outcome.state);
            }

            if changed {
                month.touch();
                if let Err(err) = self.write_month(month_key, &month).await {
                    months.remove(month_key);
                    event!(Level::ERROR, error = %err, "month merge write failed");
                    return Err(err);
                }
            }
            months.insert(month_key.to_string(), month);
            report.written = changed;

            event!(
                Level::INFO,
                conflicts = report.conflict_count,
                written = changed,
                "month merge saved"
            );
            Ok::<_, DayStateError>(report)
        }
        .instrument(span)
        .await
    }

    /// Returns a copy of a whole normalized month. A missing month is returned empty
    /// and is not created on disk.
    pub async fn load_month(&self, month_key: &str) -> Result<MonthlyDayStateFile> {
        validate_month_key(month_key)?;
        let mut months = self.months.lock().await;
        if let Some(month) = months.get(month_key) {
            return Ok(month.clone());
        }
        match self.read_month_from_disk(month_key).await? {
            Some(month) => {
                months.insert(month_key.to_string(), month.clone());
                Ok(month)
            }
            None => Ok(MonthlyDayStateFile::with_version(&self.config.format_version)),
        }
    }

    /// Rewrites every month file that references `old_path`.
    ///
    /// Every month is attempted; the first failure is returned afterwards.
    pub async fn rename_task_path(&self, old_path: &str, new_path: &str) -> Result<usize> {
        let mut months = self.months.lock().await;
        for month in months.values_mut() {
            rename_paths_in_monthly_state(month, old_path, new_path);
        }

        let files = self.documents.list(&self.config.log_data_root).await?;
        let mut rewritten = 0;
        let mut first_error = None;
        for path in files {
            let Some(month_key) = self.config.month_key_from_path(&path) else {
                continue;
            };
            let mut month = match self.read_month_from_disk(&month_key).await {
                Ok(Some(month)) => month,
                Ok(None) => continue,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            if !rename_paths_in_monthly_state(&mut month, old_path, new_path) {
                months.insert(month_key, month);
                continue;
            }
            match self.write_month(&month_key, &month).await {
                Ok(()) => {
                    rewritten += 1;
                    months.insert(month_key, month);
                }
                Err(err) => {
                    warn!("rename of '{}' failed for month {}: {}", old_path, month_key, err);
                    months.remove(&month_key);
                    first_error.get_or_insert(err);
                }
            }
        }

        event!(
            Level::INFO,
            old_path = %old_path,
            new_path = %new_path,
            months = rewritten,
            "task path renamed"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(rewritten),
        }
    }

    pub async fn clear_cache(&self, month_key: Option<&str>) {
        let mut months = self.months.lock().await;
        match month_key {
            Some(key) => {
                months.remove(key);
            }
            None => months.clear(),
        }
    }

    async fn read_month_from_disk(&self, month_key: &str) -> Result<Option<MonthlyDayStateFile>> {
        let path = self.config.month_file_path(month_key);
        if !self.documents.exists(&path).await? {
            return Ok(None);
        }
        let raw = self.documents.read(&path).await?;
        Ok(Some(parse_month(&raw, &self.config.format_version)))
    }

    async fn read_or_create_month(&self, month_key: &str) -> Result<MonthlyDayStateFile> {
        Ok(self
            .read_month_from_disk(month_key)
            .await?
            .unwrap_or_else(|| MonthlyDayStateFile::with_version(&self.config.format_version)))
    }

    async fn write_month(&self, month_key: &str, month: &MonthlyDayStateFile) -> Result<()> {
        if !self.config.log_data_root.is_empty() {
            self.documents
                .ensure_folder(&self.config.log_data_root)
                .await?;
        }
        let text = if self.config.pretty_json {
            serde_json::to_string_pretty(month)?
        } else {
            serde_json::to_string(month)?
        };
        self.documents
            .write(&self.config.month_file_path(month_key), &text)
            .await
    }
}

#[async_trait]
impl DayStatePersistence for PersistentDayStore {
    async fn load_day(&self, date_key: &str) -> Result<DayState> {
        PersistentDayStore::load_day(self, date_key).await
    }

    async fn save_day(&self, date_key: &str, state: &DayState) -> Result<()> {
        PersistentDayStore::save_day(self, date_key, state)
            .await
            .map(|_| ())
    }

    fn supports_month_merge(&self) -> bool {
        true
    }

    async fn merge_and_save_month(
        &self,
        month_key: &str,
        local_days: BTreeMap<String, DayState>,
    ) -> Result<MonthMergeReport> {
        PersistentDayStore::merge_and_save_month(self, month_key, local_days).await
    }

    async fn rename_task_path(&self, old_path: &str, new_path: &str) -> Result<usize> {
        PersistentDayStore::rename_task_path(self, old_path, new_path).await
    }

    async fn clear_cache(&self, month_key: Option<&str>) {
        PersistentDayStore::clear_cache(self, month_key).await
    }
}

/// Structural equality through serialization, which also treats two NaN ranks as equal.
pub(crate) fn same_state(a: &DayState, b: &DayState) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn apply_patch(state: &mut DayState, patch: DayStatePatch) {
    if let Some(hidden) = patch.hidden_routines {
        state.hidden_routines = merge_hidden_routines(&state.hidden_routines, &hidden).merged;
    }
    if let Some(deleted) = patch.deleted_instances {
        state.deleted_instances = merge_deleted_instances(&state.deleted_instances, &deleted).merged;
    }
    if let Some(duplicates) = patch.duplicated_instances {
        state.duplicated_instances = merge_duplicated_instances(
            &state.duplicated_instances,
            &duplicates,
            &DeletedInfo::default(),
        )
        .merged;
    }
    if let Some(overrides) = patch.slot_overrides {
        state.slot_overrides.extend(overrides);
    }
    if let Some(meta) = patch.slot_overrides_meta {
        state.slot_overrides_meta.extend(meta);
    }
    if let Some(orders) = patch.orders {
        state.orders.extend(orders);
    }
    if let Some(meta) = patch.orders_meta {
        state.orders_meta.extend(meta);
    }
}
