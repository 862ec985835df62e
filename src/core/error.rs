use thiserror::Error;

#[derive(Error, Debug)]
pub enum DayStateError {
    #[error("Invalid date key: {0}")]
    InvalidDateKey(String),

    #[error("Invalid month key: {0}")]
    InvalidMonthKey(String),

    #[error("Invalid overlay entry: {0}")]
    InvalidEntry(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Flush failed for {} date(s) [{}]: {reason}", dates.len(), dates.join(", "))]
    FlushFailed { dates: Vec<String>, reason: String },

    #[error("Persist worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DayStateError>;

impl From<serde_json::Error> for DayStateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
