//! In-memory day-state cache with a reentrant write barrier.
//!
//! Reads and writes against the cache are synchronous and immediately visible.
//! Persistence runs behind it: through an ordered queue normally, or batched
//! per month while a write barrier is open.

mod barrier;
mod worker;

use crate::config::DayStateConfig;
use crate::core::keys::{get_date_from_key, month_key_for, order_key, today_key};
use crate::core::{
    DayState, DayStateError, DeletedInstance, DeletionType, DuplicatedInstance, EpochMillis,
    HiddenRoutine, OrderMeta, Result, SlotOverrideMeta, now_millis,
};
use crate::merge::{deletion_entries_match, hidden_entries_match, merge_day_states};
use crate::rename::rename_paths_in_day_state;
use crate::storage::day_store::same_state;
use crate::storage::normalize::normalize_day_state;
use crate::storage::DayStatePersistence;
use barrier::WriteBarrier;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{Level, event, info_span};
use worker::PersistQueue;

#[derive(Debug, Default)]
struct CacheInner {
    days: HashMap<String, DayState>,
    current: Option<String>,
    barrier: WriteBarrier,
}

/// Cache of day states keyed by date key, plus the "current" day pointer.
///
/// The inner lock is never held across an await point.
pub struct DayStateCache {
    persistence: Arc<dyn DayStatePersistence>,
    merge_on_flush: bool,
    inner: Mutex<CacheInner>,
    queue: PersistQueue,
}

impl DayStateCache {
    /// Creates a cache over `persistence`. Must be called inside a tokio runtime,
    /// which hosts the persist queue.
    pub fn new(persistence: Arc<dyn DayStatePersistence>, config: &DayStateConfig) -> Result<Self> {
        let queue = PersistQueue::spawn(persistence.clone())?;
        Ok(Self {
            persistence,
            merge_on_flush: config.merge_on_flush,
            inner: Mutex::new(CacheInner::default()),
            queue,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Every critical section leaves the maps consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_key(inner: &CacheInner, date_key: Option<&str>) -> Result<String> {
        match date_key {
            Some(key) => {
                get_date_from_key(key)?;
                Ok(key.to_string())
            }
            None => Ok(inner.current.clone().unwrap_or_else(today_key)),
        }
    }

    // ------------------------------------------------------------------
    // Loading and access
    // ------------------------------------------------------------------

    /// Returns the day, loading it on a cache miss.
    ///
    /// Without an explicit key the current day (or today) is used and becomes current.
    pub async fn ensure(&self, date_key: Option<&str>) -> Result<DayState> {
        let key = {
            let mut inner = self.lock();
            let key = Self::resolve_key(&inner, date_key)?;
            if date_key.is_none() {
                inner.current = Some(key.clone());
            }
            if let Some(state) = inner.days.get(&key) {
                return Ok(state.clone());
            }
            key
        };

        let loaded = normalize_day_state(self.persistence.load_day(&key).await?);

        let mut inner = self.lock();
        // Writes made while the load was in flight are merged, not lost.
        let state = match inner.days.get(&key) {
            Some(edited) => merge_day_states(edited, &loaded, None).state,
            None => loaded,
        };
        inner.days.insert(key, state.clone());
        Ok(state)
    }

    /// Returns a copy of the cached day, materializing an empty one on first touch.
    pub fn get_state_for(&self, date_key: Option<&str>) -> Result<DayState> {
        let mut inner = self.lock();
        let key = Self::resolve_key(&inner, date_key)?;
        Ok(inner.days.entry(key).or_default().clone())
    }

    pub fn get_current(&self) -> Result<DayState> {
        self.get_state_for(None)
    }

    pub fn set_current(&self, date_key: &str) -> Result<()> {
        get_date_from_key(date_key)?;
        self.lock().current = Some(date_key.to_string());
        Ok(())
    }

    pub fn current_key(&self) -> Option<String> {
        self.lock().current.clone()
    }

    // ------------------------------------------------------------------
    // Typed overlay helpers
    // ------------------------------------------------------------------

    /// Replaces the hidden-routine list of a day.
    pub fn set_hidden(&self, date_key: &str, entries: Vec<HiddenRoutine>) -> Result<()> {
        self.mutate(date_key, |state| state.hidden_routines = entries)
    }

    pub fn get_hidden(&self, date_key: &str) -> Result<Vec<HiddenRoutine>> {
        self.read(date_key, |state| state.hidden_routines.clone())
    }

    /// Whether an active hide covers the document at `path`, or the given instance of it.
    pub fn is_hidden(&self, date_key: &str, path: &str, instance_id: Option<&str>) -> Result<bool> {
        self.read(date_key, |state| {
            state.hidden_routines.iter().any(|entry| {
                entry.path == path
                    && crate::merge::is_hidden(entry)
                    && match entry.instance_id.as_deref().filter(|id| !id.is_empty()) {
                        None => true,
                        Some(hidden_id) => instance_id == Some(hidden_id),
                    }
            })
        })
    }

    /// Replaces the deletion list of a day.
    pub fn set_deleted(&self, date_key: &str, entries: Vec<DeletedInstance>) -> Result<()> {
        for entry in &entries {
            validate_deletion(entry)?;
        }
        self.mutate(date_key, |state| state.deleted_instances = entries)
    }

    pub fn get_deleted(&self, date_key: &str) -> Result<Vec<DeletedInstance>> {
        self.read(date_key, |state| state.deleted_instances.clone())
    }

    /// Whether an active deletion covers the instance or its document.
    pub fn is_deleted(
        &self,
        date_key: &str,
        task_id: Option<&str>,
        path: &str,
        instance_id: Option<&str>,
    ) -> Result<bool> {
        self.read(date_key, |state| {
            state.deleted_instances.iter().any(|entry| {
                if !crate::merge::is_deleted(entry) {
                    return false;
                }
                match entry.scoped_instance_id() {
                    Some(deleted_id) => instance_id == Some(deleted_id),
                    None => match (entry.task_id.as_deref(), task_id) {
                        (Some(deleted_task), Some(task)) if !deleted_task.is_empty() => {
                            deleted_task == task
                        }
                        _ => entry.path.as_deref() == Some(path),
                    },
                }
            })
        })
    }

    /// Hides a routine (or one instance of it) from now on.
    pub fn hide_routine(&self, date_key: &str, path: &str, instance_id: Option<&str>) -> Result<()> {
        let probe = HiddenRoutine {
            path: path.to_string(),
            instance_id: instance_id.map(str::to_string),
            hidden_at: None,
            restored_at: None,
        };
        self.mutate(date_key, |state| {
            match state
                .hidden_routines
                .iter_mut()
                .find(|entry| hidden_entries_match(entry, &probe))
            {
                Some(entry) => entry.hidden_at = Some(stamp_at_least(entry.restored_at)),
                None => state
                    .hidden_routines
                    .push(probe.clone().with_hidden_at(now_millis())),
            }
        })
    }

    /// Stamps a restore on a hidden routine. Returns `false` if nothing was hidden.
    pub fn restore_routine(
        &self,
        date_key: &str,
        path: &str,
        instance_id: Option<&str>,
    ) -> Result<bool> {
        let probe = HiddenRoutine {
            path: path.to_string(),
            instance_id: instance_id.map(str::to_string),
            hidden_at: None,
            restored_at: None,
        };
        self.mutate_if(date_key, |state| {
            let Some(entry) = state
                .hidden_routines
                .iter_mut()
                .find(|entry| hidden_entries_match(entry, &probe))
            else {
                return false;
            };
            entry.restored_at = Some(stamp_after(entry.hidden_at));
            true
        })
    }

    /// Records a deletion from now on. Temporary deletions need an instance id.
    pub fn delete_instance(&self, date_key: &str, entry: DeletedInstance) -> Result<()> {
        validate_deletion(&entry)?;
        self.mutate(date_key, |state| {
            match state
                .deleted_instances
                .iter_mut()
                .find(|existing| deletion_entries_match(existing, &entry))
            {
                Some(existing) => {
                    existing.deleted_at = Some(stamp_at_least(existing.restored_at));
                    existing.deletion_type = existing.deletion_type.max(entry.deletion_type);
                    if existing.task_id.is_none() {
                        existing.task_id = entry.task_id;
                    }
                    if existing.path.is_none() {
                        existing.path = entry.path;
                    }
                }
                None => {
                    let mut entry = entry;
                    entry.deleted_at = Some(now_millis());
                    state.deleted_instances.push(entry);
                }
            }
        })
    }

    /// Stamps a restore on the deletion matching `probe`. Returns `false` if none matched.
    pub fn restore_instance(&self, date_key: &str, probe: &DeletedInstance) -> Result<bool> {
        self.mutate_if(date_key, |state| {
            let Some(entry) = state
                .deleted_instances
                .iter_mut()
                .find(|existing| deletion_entries_match(existing, probe))
            else {
                return false;
            };
            let deleted_at = crate::merge::get_effective_deleted_at(entry);
            entry.restored_at = Some(stamp_after(deleted_at));
            true
        })
    }

    pub fn set_slot_override(&self, date_key: &str, doc_key: &str, slot_key: &str) -> Result<()> {
        self.mutate(date_key, |state| {
            state
                .slot_overrides
                .insert(doc_key.to_string(), slot_key.to_string());
            state.slot_overrides_meta.insert(
                doc_key.to_string(),
                SlotOverrideMeta {
                    slot_key: slot_key.to_string(),
                    updated_at: now_millis(),
                },
            );
        })
    }

    pub fn get_slot_override(&self, date_key: &str, doc_key: &str) -> Result<Option<String>> {
        self.read(date_key, |state| state.slot_overrides.get(doc_key).cloned())
    }

    /// Removes an override, leaving a metadata tombstone so the removal survives a merge.
    pub fn clear_slot_override(&self, date_key: &str, doc_key: &str) -> Result<bool> {
        self.mutate_if(date_key, |state| {
            let Some(previous) = state.slot_overrides.remove(doc_key) else {
                return false;
            };
            state.slot_overrides_meta.insert(
                doc_key.to_string(),
                SlotOverrideMeta {
                    slot_key: previous,
                    updated_at: now_millis(),
                },
            );
            true
        })
    }

    pub fn set_order(&self, date_key: &str, doc_key: &str, slot_key: &str, order: f64) -> Result<()> {
        if !order.is_finite() {
            return Err(DayStateError::InvalidEntry(format!(
                "order for {} must be finite",
                doc_key
            )));
        }
        let key = order_key(doc_key, slot_key);
        self.mutate(date_key, |state| {
            state.orders.insert(key.clone(), order);
            state.orders_meta.insert(
                key,
                OrderMeta {
                    order,
                    updated_at: now_millis(),
                },
            );
        })
    }

    pub fn get_order(&self, date_key: &str, doc_key: &str, slot_key: &str) -> Result<Option<f64>> {
        let key = order_key(doc_key, slot_key);
        self.read(date_key, |state| state.orders.get(&key).copied())
    }

    /// Records a duplicate, replacing any entry with the same instance id.
    pub fn add_duplicate(&self, date_key: &str, mut duplicate: DuplicatedInstance) -> Result<()> {
        if duplicate.instance_id.is_empty() || duplicate.original_path.is_empty() {
            return Err(DayStateError::InvalidEntry(
                "duplicate needs an instance id and an original path".to_string(),
            ));
        }
        let now = now_millis();
        duplicate.timestamp.get_or_insert(now);
        duplicate.created_millis.get_or_insert(now);
        self.mutate(date_key, |state| {
            state
                .duplicated_instances
                .retain(|existing| existing.instance_id != duplicate.instance_id);
            state.duplicated_instances.push(duplicate);
        })
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Writes the cached day through the ordered queue and waits for the result.
    ///
    /// A day not cached yet is materialized empty first. While a write barrier is
    /// open the day is only recorded for the flush.
    pub async fn persist(&self, date_key: Option<&str>) -> Result<()> {
        let saved = {
            let mut inner = self.lock();
            let key = Self::resolve_key(&inner, date_key)?;
            let snapshot = inner.days.entry(key.clone()).or_default().clone();
            if inner.barrier.is_active() {
                inner.barrier.record(month_key_for(&key)?, key, snapshot);
                return Ok(());
            }
            // Queued under the lock, so issue order matches the order of cache states.
            self.queue.save(key, snapshot)?
        };
        saved
            .await
            .map_err(|_| DayStateError::Worker("persist job was dropped".to_string()))?
    }

    /// Waits until every persist scheduled so far has reached the persistence layer.
    pub async fn wait_for_persists(&self) -> Result<()> {
        self.queue.drain().await
    }

    fn schedule_persist(&self, date_key: &str) {
        let mut inner = self.lock();
        let snapshot = inner.days.entry(date_key.to_string()).or_default().clone();
        if inner.barrier.is_active() {
            match month_key_for(date_key) {
                Ok(month_key) => inner.barrier.record(month_key, date_key.to_string(), snapshot),
                Err(err) => warn!("cannot defer persist of {}: {}", date_key, err),
            }
        } else if let Err(err) = self.queue.enqueue(date_key.to_string(), snapshot) {
            warn!("failed to schedule persist of {}: {}", date_key, err);
        }
    }

    /// Rewrites `old_path` in every cached day and pending snapshot, then on disk.
    ///
    /// Cache-side rewrites are kept even if the on-disk pass fails.
    pub async fn rename_task_path(&self, old_path: &str, new_path: &str) -> Result<usize> {
        let touched: Vec<String> = {
            let mut inner = self.lock();
            let touched = inner
                .days
                .iter_mut()
                .filter_map(|(key, state)| {
                    rename_paths_in_day_state(state, old_path, new_path).then(|| key.clone())
                })
                .collect();
            inner.barrier.rename_paths(old_path, new_path);
            touched
        };
        event!(
            Level::DEBUG,
            cached_days = touched.len(),
            "renamed path in cached days"
        );
        // Saves queued before the rename must land before the disk pass reads the months.
        self.queue.drain().await?;
        self.persistence.rename_task_path(old_path, new_path).await
    }

    /// Drops one cached day (and its month in the persistence cache), or everything.
    pub async fn clear(&self, date_key: Option<&str>) -> Result<()> {
        let month_key = match date_key {
            Some(key) => {
                let month_key = month_key_for(key)?;
                self.lock().days.remove(key);
                Some(month_key)
            }
            None => {
                self.lock().days.clear();
                None
            }
        };
        self.persistence.clear_cache(month_key.as_deref()).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write barrier
    // ------------------------------------------------------------------

    /// Opens (or nests) a write barrier and returns the new depth.
    pub fn begin_write_barrier(&self) -> usize {
        self.lock().barrier.enter()
    }

    pub fn is_barrier_active(&self) -> bool {
        self.lock().barrier.is_active()
    }

    /// Dates recorded by a barrier and not yet flushed.
    pub fn pending_dates(&self) -> Vec<String> {
        self.lock().barrier.pending_dates()
    }

    /// Closes one barrier level. The outermost close flushes every pending day.
    ///
    /// The flush runs on the persist queue, after every save issued before it and
    /// before any issued later. Every pending date is attempted. Dates that could not
    /// be written stay pending for the next barrier session and are listed in the
    /// returned error.
    pub async fn end_write_barrier(&self) -> Result<()> {
        let finished = {
            let mut inner = self.lock();
            match inner.barrier.exit() {
                None => {
                    warn!("end_write_barrier called without an open barrier");
                    return Ok(());
                }
                Some(0) if inner.barrier.has_pending() => {}
                Some(_) => return Ok(()),
            }
            let batches = inner.barrier.batches();
            let span = info_span!(
                "daystate.barrier.flush",
                months = batches.len(),
                days = batches.values().map(BTreeMap::len).sum::<usize>()
            );
            let month_merge = self.merge_on_flush && self.persistence.supports_month_merge();
            // Submitted under the lock so no later save can be queued ahead of it.
            self.queue.flush(batches, month_merge, span)?
        };

        let outcome = finished
            .await
            .map_err(|_| DayStateError::Worker("flush job was dropped".to_string()))?;
        for (date_key, snapshot, merged) in &outcome.written {
            self.settle(date_key, snapshot, merged.as_ref());
        }
        match outcome.last_error {
            None => Ok(()),
            Some(reason) => Err(DayStateError::FlushFailed {
                dates: outcome.failed,
                reason,
            }),
        }
    }

    /// Clears a flushed snapshot and resynchronizes the cached day from the merged state.
    fn settle(&self, date_key: &str, snapshot: &DayState, merged: Option<&DayState>) {
        let mut inner = self.lock();
        inner.barrier.settle(date_key, snapshot);
        let Some(merged) = merged else {
            return;
        };
        let resynced = match inner.days.get(date_key) {
            Some(cached) if same_state(cached, snapshot) => merged.clone(),
            // Edited since the snapshot was taken: keep those edits on top of disk state.
            Some(cached) => merge_day_states(cached, merged, None).state,
            None => return,
        };
        inner.days.insert(date_key.to_string(), resynced);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read<R>(&self, date_key: &str, reader: impl FnOnce(&DayState) -> R) -> Result<R> {
        get_date_from_key(date_key)?;
        let mut inner = self.lock();
        Ok(reader(inner.days.entry(date_key.to_string()).or_default()))
    }

    fn mutate(&self, date_key: &str, mutator: impl FnOnce(&mut DayState)) -> Result<()> {
        self.mutate_if(date_key, |state| {
            mutator(state);
            true
        })
        .map(|_| ())
    }

    /// Applies `mutator`; schedules a persist when it reports a change.
    fn mutate_if(&self, date_key: &str, mutator: impl FnOnce(&mut DayState) -> bool) -> Result<bool> {
        get_date_from_key(date_key)?;
        let changed = {
            let mut inner = self.lock();
            mutator(inner.days.entry(date_key.to_string()).or_default())
        };
        if changed {
            self.schedule_persist(date_key);
        }
        Ok(changed)
    }
}

fn validate_deletion(entry: &DeletedInstance) -> Result<()> {
    if entry.deletion_type == DeletionType::Temporary && entry.scoped_instance_id().is_none() {
        return Err(DayStateError::InvalidEntry(
            "temporary deletion needs an instance id".to_string(),
        ));
    }
    let has_identity = [&entry.task_id, &entry.path, &entry.instance_id]
        .iter()
        .any(|field| field.as_deref().is_some_and(|v| !v.is_empty()));
    if !has_identity {
        return Err(DayStateError::InvalidEntry(
            "deletion needs a task id, path or instance id".to_string(),
        ));
    }
    Ok(())
}

/// Now, but never older than `floor`. A tie with a restore favors the destructive event.
fn stamp_at_least(floor: Option<EpochMillis>) -> EpochMillis {
    now_millis().max(floor.unwrap_or(EpochMillis::MIN))
}

/// Now, but strictly newer than `after`, so a restore always outranks its event.
fn stamp_after(after: Option<EpochMillis>) -> EpochMillis {
    match after {
        Some(at) => now_millis().max(at.saturating_add(1)),
        None => now_millis(),
    }
}
