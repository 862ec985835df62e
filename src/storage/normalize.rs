//! Coerces month files of any vintage into the canonical shape.
//!
//! Legacy shapes (bare-string hidden routines, nested order objects, deletions
//! without a `deletionType`) are accepted here and nowhere else. Malformed
//! parts are dropped with a warning; a month file never fails to load.

use crate::core::keys::get_date_from_key;
use crate::core::{
    DayState, DeletedInstance, DeletionType, DuplicatedInstance, EpochMillis, HiddenRoutine,
    MonthMetadata, MonthlyDayStateFile, OrderMeta, SlotOverrideMeta,
};
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A hidden-routine entry as found on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawHiddenRoutine {
    Path(String),
    Entry(HiddenRoutine),
}

impl From<RawHiddenRoutine> for HiddenRoutine {
    fn from(raw: RawHiddenRoutine) -> Self {
        match raw {
            RawHiddenRoutine::Path(path) => HiddenRoutine::path_level(path),
            RawHiddenRoutine::Entry(entry) => entry,
        }
    }
}

/// An order rank as found on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawOrderValue {
    Rank(f64),
    Nested { order: f64 },
}

impl RawOrderValue {
    pub fn rank(&self) -> f64 {
        match self {
            Self::Rank(rank) => *rank,
            Self::Nested { order } => *order,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeletedInstance {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    deletion_type: Option<DeletionType>,
    #[serde(default)]
    deleted_at: Option<EpochMillis>,
    #[serde(default)]
    restored_at: Option<EpochMillis>,
    #[serde(default)]
    timestamp: Option<EpochMillis>,
}

/// Parses month file text. Unparseable text yields an empty month.
pub fn parse_month(raw: &str, format_version: &str) -> MonthlyDayStateFile {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => normalize_month(value, format_version),
        Err(err) => {
            warn!("malformed month state file, treating as empty: {}", err);
            MonthlyDayStateFile::with_version(format_version)
        }
    }
}

pub fn normalize_month(value: Value, format_version: &str) -> MonthlyDayStateFile {
    let Value::Object(mut root) = value else {
        warn!("month state root is not an object, treating as empty");
        return MonthlyDayStateFile::with_version(format_version);
    };

    let mut days = BTreeMap::new();
    if let Some(Value::Object(raw_days)) = root.remove("days") {
        for (date_key, raw_day) in raw_days {
            if get_date_from_key(&date_key).is_err() {
                warn!("dropping day with invalid key '{}'", date_key);
                continue;
            }
            days.insert(date_key, normalize_day(&raw_day));
        }
    }

    let metadata = normalize_metadata(root.get("metadata"), format_version);
    MonthlyDayStateFile { days, metadata }
}

fn normalize_metadata(raw: Option<&Value>, format_version: &str) -> MonthMetadata {
    let object = raw.and_then(Value::as_object);
    let version = object
        .and_then(|o| o.get("version"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or(format_version)
        .to_string();
    let last_updated = object
        .and_then(|o| o.get("lastUpdated"))
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);
    MonthMetadata {
        version,
        last_updated,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Builds a canonical day from whatever JSON was stored for it.
pub fn normalize_day(raw: &Value) -> DayState {
    let Some(object) = raw.as_object() else {
        return DayState::default();
    };

    let state = DayState {
        hidden_routines: array_items(object, "hiddenRoutines")
            .filter_map(|item| serde_json::from_value::<RawHiddenRoutine>(item.clone()).ok())
            .map(HiddenRoutine::from)
            .collect(),
        deleted_instances: array_items(object, "deletedInstances")
            .filter_map(normalize_deleted_entry)
            .collect(),
        duplicated_instances: array_items(object, "duplicatedInstances")
            .filter_map(|item| serde_json::from_value::<DuplicatedInstance>(item.clone()).ok())
            .collect(),
        slot_overrides: map_entries(object, "slotOverrides", |value| {
            value.as_str().map(str::to_string)
        }),
        slot_overrides_meta: map_entries(object, "slotOverridesMeta", |value| {
            serde_json::from_value::<SlotOverrideMeta>(value.clone()).ok()
        }),
        orders: map_entries(object, "orders", |value| {
            serde_json::from_value::<RawOrderValue>(value.clone())
                .ok()
                .map(|raw| raw.rank())
                .filter(|rank| rank.is_finite())
        }),
        orders_meta: map_entries(object, "ordersMeta", |value| {
            serde_json::from_value::<OrderMeta>(value.clone()).ok()
        }),
    };
    normalize_day_state(state)
}

/// Typed cleanup applied to every day entering the system.
///
/// Blank instance ids become `None`, entries without identity are dropped, and
/// temporary deletions without an instance id are dropped.
pub fn normalize_day_state(mut state: DayState) -> DayState {
    state.hidden_routines.retain_mut(|entry| {
        if entry.instance_id.as_deref() == Some("") {
            entry.instance_id = None;
        }
        !entry.path.is_empty()
    });

    state.deleted_instances.retain(|entry| {
        if entry.deletion_type == DeletionType::Temporary && entry.scoped_instance_id().is_none() {
            warn!(
                "dropping temporary deletion without instance id (path={:?})",
                entry.path
            );
            return false;
        }
        [&entry.task_id, &entry.path, &entry.instance_id]
            .iter()
            .any(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
    });

    state
        .duplicated_instances
        .retain(|entry| !entry.instance_id.is_empty() && !entry.original_path.is_empty());

    state
}

fn normalize_deleted_entry(item: &Value) -> Option<DeletedInstance> {
    let raw = serde_json::from_value::<RawDeletedInstance>(item.clone()).ok()?;
    let has_instance = raw.instance_id.as_deref().is_some_and(|id| !id.is_empty());
    let deletion_type = raw.deletion_type.unwrap_or(if has_instance {
        DeletionType::Temporary
    } else {
        DeletionType::Permanent
    });
    Some(DeletedInstance {
        task_id: raw.task_id.filter(|v| !v.is_empty()),
        path: raw.path.filter(|v| !v.is_empty()),
        instance_id: raw.instance_id.filter(|v| !v.is_empty()),
        deletion_type,
        deleted_at: raw.deleted_at,
        restored_at: raw.restored_at,
        timestamp: raw.timestamp,
    })
}

fn array_items<'a>(object: &'a Map<String, Value>, field: &str) -> impl Iterator<Item = &'a Value> {
    object
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn map_entries<T>(
    object: &Map<String, Value>,
    field: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> BTreeMap<String, T> {
    object
        .get(field)
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| convert(value).map(|converted| (key.clone(), converted)))
        .collect()
}
