/// Timestamp type (seconds since epoch).
pub type Timestamp = u32;

/// Value type.
pub type Value = f64;

/// A single sample handed to the store, e.g. by bulk ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub ts: Timestamp,
    pub value: Value,
}

impl Point {
    pub fn new(ts: Timestamp, value: Value) -> Self {
        Self { ts, value }
    }
}

impl From<(Timestamp, Value)> for Point {
    fn from((ts, value): (Timestamp, Value)) -> Self {
        Self { ts, value }
    }
}

/// Rounds `ts` down to the nearest multiple of `span`.
#[inline]
pub fn aligned_start(ts: Timestamp, span: u32) -> Timestamp {
    ts - (ts % span)
}
