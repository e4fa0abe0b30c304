use crate::encoding::{Series, SeriesIter};
use crate::error::StoreError;
use crate::types::{Timestamp, Value};

/// A compressed run of samples covering one aligned `chunk_span` window.
///
/// Created open on the first write into its ring slot and sealed exactly once, when the
/// owning store moves on to a later window. Sealed chunks are immutable.
#[derive(Debug, Clone)]
pub struct Chunk {
    start: Timestamp,
    series: Series,
}

impl Chunk {
    /// Opens a new chunk for the window beginning at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            series: Series::new(start),
        }
    }

    pub fn push(&mut self, ts: Timestamp, value: Value) -> Result<(), StoreError> {
        self.series.push(ts, value)
    }

    /// Finalizes the codec. Returns `true` only for the call that actually sealed it.
    pub fn seal(&mut self) -> bool {
        if self.series.is_finished() {
            return false;
        }
        self.series.finish();
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.series.is_finished()
    }

    /// Aligned start of the window this chunk covers.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        self.series.encoded_len()
    }

    pub fn iter(&self) -> SeriesIter {
        self.series.iter()
    }
}
