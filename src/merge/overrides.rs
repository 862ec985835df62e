use super::MergeOutcome;
use crate::core::{EpochMillis, OrderMeta, SlotOverrideMeta};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{Level, event};

/// Per-key metadata carrying the time of the last write (or deletion) of the key.
pub trait Stamped {
    fn updated_at(&self) -> EpochMillis;
}

impl Stamped for SlotOverrideMeta {
    fn updated_at(&self) -> EpochMillis {
        self.updated_at
    }
}

impl Stamped for OrderMeta {
    fn updated_at(&self) -> EpochMillis {
        self.updated_at
    }
}

/// A value map and its metadata map after a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedMaps<V, M> {
    pub values: BTreeMap<String, V>,
    pub meta: BTreeMap<String, M>,
}

pub type SlotOverrideMerge = StampedMaps<String, SlotOverrideMeta>;
pub type OrderMerge = StampedMaps<f64, OrderMeta>;

pub fn merge_slot_overrides(
    local: &BTreeMap<String, String>,
    local_meta: &BTreeMap<String, SlotOverrideMeta>,
    remote: &BTreeMap<String, String>,
    remote_meta: &BTreeMap<String, SlotOverrideMeta>,
) -> MergeOutcome<SlotOverrideMerge> {
    merge_stamped_maps(local, local_meta, remote, remote_meta)
}

/// Same rules as [`merge_slot_overrides`].
///
/// `remote_month_updated_at` is the remote month file's `lastUpdated`. It does not
/// take part in resolution and is only reported. A metadata-backed local key already
/// beats an unstamped remote key, so a newer month file can never override it; only
/// a competing per-key stamp that is newer can.
pub fn merge_orders(
    local: &BTreeMap<String, f64>,
    local_meta: &BTreeMap<String, OrderMeta>,
    remote: &BTreeMap<String, f64>,
    remote_meta: &BTreeMap<String, OrderMeta>,
    remote_month_updated_at: Option<EpochMillis>,
) -> MergeOutcome<OrderMerge> {
    if let Some(month_at) = remote_month_updated_at {
        let shielded = local_meta
            .iter()
            .filter(|(key, meta)| {
                remote.contains_key(*key)
                    && !remote_meta.contains_key(*key)
                    && meta.updated_at < month_at
            })
            .count();
        if shielded > 0 {
            event!(
                Level::DEBUG,
                shielded,
                remote_month_updated_at = month_at,
                "local order keys kept over older-stamped but newer remote month"
            );
        }
    }
    merge_stamped_maps(local, local_meta, remote, remote_meta)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Winner {
    Local,
    Remote,
}

struct Side<'a, V, M> {
    value: Option<&'a V>,
    meta: Option<&'a M>,
}

impl<V, M> Side<'_, V, M> {
    fn is_absent(&self) -> bool {
        self.value.is_none() && self.meta.is_none()
    }

    fn is_tombstone(&self) -> bool {
        self.value.is_none() && self.meta.is_some()
    }
}

/// Per-key resolution:
/// - both sides stamped: newer `updatedAt` wins; on a tie a deletion tombstone wins,
///   then the greater value (so the result does not depend on argument order);
/// - one side stamped: the stamped side wins, including a tombstone removing the key;
/// - neither stamped: remote wins; a key present on one side only is kept.
fn merge_stamped_maps<V, M>(
    local: &BTreeMap<String, V>,
    local_meta: &BTreeMap<String, M>,
    remote: &BTreeMap<String, V>,
    remote_meta: &BTreeMap<String, M>,
) -> MergeOutcome<StampedMaps<V, M>>
where
    V: Clone + PartialEq + PartialOrd,
    M: Clone + PartialEq + Stamped,
{
    let keys: BTreeSet<&String> = local
        .keys()
        .chain(local_meta.keys())
        .chain(remote.keys())
        .chain(remote_meta.keys())
        .collect();

    let mut values = BTreeMap::new();
    let mut meta = BTreeMap::new();
    let mut conflict_count = 0;

    for key in keys {
        let l = Side {
            value: local.get(key),
            meta: local_meta.get(key),
        };
        let r = Side {
            value: remote.get(key),
            meta: remote_meta.get(key),
        };

        if !l.is_absent() && !r.is_absent() && (l.value != r.value || l.meta != r.meta) {
            conflict_count += 1;
        }

        let chosen = match pick_winner(&l, &r) {
            Winner::Local => l,
            Winner::Remote => r,
        };
        if let Some(value) = chosen.value {
            values.insert(key.clone(), value.clone());
        }
        if let Some(stamp) = chosen.meta {
            meta.insert(key.clone(), stamp.clone());
        }
    }

    MergeOutcome::new(StampedMaps { values, meta }, conflict_count)
}

fn pick_winner<V, M>(l: &Side<'_, V, M>, r: &Side<'_, V, M>) -> Winner
where
    V: PartialOrd,
    M: Stamped,
{
    if l.is_absent() {
        return Winner::Remote;
    }
    if r.is_absent() {
        return Winner::Local;
    }

    match (l.meta, r.meta) {
        (Some(lm), Some(rm)) => match lm.updated_at().cmp(&rm.updated_at()) {
            Ordering::Greater => Winner::Local,
            Ordering::Less => Winner::Remote,
            Ordering::Equal => {
                if l.is_tombstone() {
                    Winner::Local
                } else if r.is_tombstone() {
                    Winner::Remote
                } else if matches!(
                    r.value.partial_cmp(&l.value),
                    Some(Ordering::Greater)
                ) {
                    Winner::Remote
                } else {
                    Winner::Local
                }
            }
        },
        (Some(_), None) => Winner::Local,
        (None, Some(_)) => Winner::Remote,
        (None, None) => {
            if r.value.is_some() {
                Winner::Remote
            } else {
                Winner::Local
            }
        }
    }
}
