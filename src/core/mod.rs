pub mod error;
pub mod keys;
pub mod types;

pub use error::{DayStateError, Result};
pub use keys::{
    date_key, document_key, get_date_from_key, month_key, month_key_for, order_key,
    split_order_key, today_key, validate_month_key,
};
pub use types::{
    DayState, DayStatePatch, DeletedInstance, DeletionType, DuplicatedInstance, EpochMillis,
    HiddenRoutine, MonthMetadata, MonthlyDayStateFile, OrderMeta, SlotOverrideMeta, now_millis,
};
