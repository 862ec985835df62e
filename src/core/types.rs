use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch. Absence (`None`) means "never happened", not zero.
pub type EpochMillis = i64;

pub const DEFAULT_FORMAT_VERSION: &str = "1.0";

pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Overlay entries
// ============================================================================

/// A hidden routine.
///
/// `instance_id: None` hides every instance generated from the document at `path`;
/// a concrete id hides a single generated occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenRoutine {
    pub path: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<EpochMillis>,
}

impl HiddenRoutine {
    pub fn path_level(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instance_id: None,
            hidden_at: None,
            restored_at: None,
        }
    }

    pub fn instance(path: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instance_id: Some(instance_id.into()),
            hidden_at: None,
            restored_at: None,
        }
    }

    pub fn with_hidden_at(mut self, at: EpochMillis) -> Self {
        self.hidden_at = Some(at);
        self
    }

    pub fn with_restored_at(mut self, at: EpochMillis) -> Self {
        self.restored_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionType {
    Temporary,
    Permanent,
}

/// A deleted task instance or document.
///
/// `Permanent` deletions are keyed by document identity (task id, else path).
/// `Temporary` deletions are scoped to one generated instance and carry a
/// non-empty `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub deletion_type: DeletionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<EpochMillis>,
    /// Pre-tombstone deletion time written by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EpochMillis>,
}

impl DeletedInstance {
    pub fn permanent(path: impl Into<String>) -> Self {
        Self {
            task_id: None,
            path: Some(path.into()),
            instance_id: None,
            deletion_type: DeletionType::Permanent,
            deleted_at: None,
            restored_at: None,
            timestamp: None,
        }
    }

    pub fn temporary(instance_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            task_id: None,
            path: Some(path.into()),
            instance_id: Some(instance_id.into()),
            deletion_type: DeletionType::Temporary,
            deleted_at: None,
            restored_at: None,
            timestamp: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_deleted_at(mut self, at: EpochMillis) -> Self {
        self.deleted_at = Some(at);
        self
    }

    pub fn with_restored_at(mut self, at: EpochMillis) -> Self {
        self.restored_at = Some(at);
        self
    }

    /// The instance id, if this entry is a well-formed instance-scoped deletion.
    pub fn scoped_instance_id(&self) -> Option<&str> {
        match (self.deletion_type, self.instance_id.as_deref()) {
            (DeletionType::Temporary, Some(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Records that an instance is an ad-hoc copy of another document's task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatedInstance {
    pub instance_id: String,
    pub original_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_slot_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_millis: Option<EpochMillis>,
}

impl DuplicatedInstance {
    pub fn new(instance_id: impl Into<String>, original_path: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            original_path: original_path.into(),
            original_task_id: None,
            slot_key: None,
            original_slot_key: None,
            timestamp: None,
            created_millis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotOverrideMeta {
    pub slot_key: String,
    pub updated_at: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMeta {
    pub order: f64,
    pub updated_at: EpochMillis,
}

// ============================================================================
// Day and month state
// ============================================================================

/// Overlay state for one calendar day. Every field defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayState {
    #[serde(default)]
    pub hidden_routines: Vec<HiddenRoutine>,
    #[serde(default)]
    pub deleted_instances: Vec<DeletedInstance>,
    #[serde(default)]
    pub duplicated_instances: Vec<DuplicatedInstance>,
    #[serde(default)]
    pub slot_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub slot_overrides_meta: BTreeMap<String, SlotOverrideMeta>,
    #[serde(default)]
    pub orders: BTreeMap<String, f64>,
    #[serde(default)]
    pub orders_meta: BTreeMap<String, OrderMeta>,
}

impl DayState {
    pub fn is_empty(&self) -> bool {
        self.hidden_routines.is_empty()
            && self.deleted_instances.is_empty()
            && self.duplicated_instances.is_empty()
            && self.slot_overrides.is_empty()
            && self.slot_overrides_meta.is_empty()
            && self.orders.is_empty()
            && self.orders_meta.is_empty()
    }
}

/// A partial day used to apply a sync delta without touching untouched fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayStatePatch {
    pub hidden_routines: Option<Vec<HiddenRoutine>>,
    pub deleted_instances: Option<Vec<DeletedInstance>>,
    pub duplicated_instances: Option<Vec<DuplicatedInstance>>,
    pub slot_overrides: Option<BTreeMap<String, String>>,
    pub slot_overrides_meta: Option<BTreeMap<String, SlotOverrideMeta>>,
    pub orders: Option<BTreeMap<String, f64>>,
    pub orders_meta: Option<BTreeMap<String, OrderMeta>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthMetadata {
    pub version: String,
    pub last_updated: DateTime<Utc>,
}

impl Default for MonthMetadata {
    fn default() -> Self {
        Self {
            version: DEFAULT_FORMAT_VERSION.to_string(),
            last_updated: Utc::now(),
        }
    }
}

/// The unit of persistence: every day of one calendar month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyDayStateFile {
    #[serde(default)]
    pub days: BTreeMap<String, DayState>,
    #[serde(default)]
    pub metadata: MonthMetadata,
}

impl MonthlyDayStateFile {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            days: BTreeMap::new(),
            metadata: MonthMetadata {
                version: version.into(),
                last_updated: Utc::now(),
            },
        }
    }

    pub fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
    }

    pub fn last_updated_millis(&self) -> EpochMillis {
        self.metadata.last_updated.timestamp_millis()
    }
}
