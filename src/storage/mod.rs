pub mod day_store;
pub mod document;
pub mod memory;
pub mod normalize;
pub mod persistence;

pub use day_store::PersistentDayStore;
pub use document::{DocumentStore, FsDocumentStore};
pub use memory::MemoryDocumentStore;
pub use normalize::{normalize_day, normalize_day_state, normalize_month, parse_month};
pub use persistence::{DayStatePersistence, MonthMergeReport};
