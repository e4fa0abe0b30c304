#![doc = include_str!("../README.md")]
// Declare modules
pub mod aggmetric;
pub mod aggregator;
pub mod chunk;
pub mod encoding;
pub mod error;
pub mod registry;
pub mod settings;
pub mod telemetry;
pub mod types;

/// Per-metric ring buffer of compressed chunks.
pub use crate::aggmetric::{AggMetric, AppendOutcome, MetricStats};
/// Capability interface for rollup consumers.
pub use crate::aggregator::Aggregator;
/// One-shot iterator over the points of a chunk.
pub use crate::encoding::SeriesIter;
/// Error type for store operations.
pub use crate::error::StoreError;
/// Key-to-metric map with parallel bulk ingest.
pub use crate::registry::{AggMetrics, BatchSummary};
/// Configuration shared by all metrics of a registry.
pub use crate::settings::StoreConfig;
/// Structured event hook for observability.
pub use crate::telemetry::{StoreEvent, StoreEventListener};
/// A single sample.
pub use crate::types::Point;
/// Type alias for a timestamp (seconds since epoch).
pub use crate::types::Timestamp;
/// Type alias for a sample value (f64).
pub use crate::types::Value;
