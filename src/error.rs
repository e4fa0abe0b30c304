use crate::types::Timestamp;
use thiserror::Error;

/// Custom error type for ring store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A read was requested with `from >= to`.
    #[error("Invalid time range: from={from}, to={to} (to must be > from)")]
    InvalidRange { from: Timestamp, to: Timestamp },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    /// Push attempted on a series that was already sealed.
    #[error("Series starting at {start} is finished")]
    SeriesFinished { start: Timestamp },

    /// Push attempted with a timestamp lower than the previous point of the series.
    #[error("Out of order point: ts={ts}, last_ts={last_ts}")]
    OutOfOrder { ts: Timestamp, last_ts: Timestamp },
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
