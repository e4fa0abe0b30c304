//! Capability interface for rollup consumers attached to an [`AggMetric`].

use crate::aggmetric::AggMetric;
use crate::types::Timestamp;

/// Receives a signal for every sample accepted by the metric it is subscribed to.
///
/// `signal` runs synchronously while the owner's lock is held, once per accepted sample,
/// in subscription order. Implementations must be fast and must not block. They may use the
/// owner's immutable accessors ([`AggMetric::key`], [`AggMetric::chunk_span`],
/// [`AggMetric::num_chunks`]) but must never call [`AggMetric::add`] or any of the read
/// operations on it: the lock is not re-entrant and doing so deadlocks.
///
/// Deciding when a rollup period has elapsed, and emitting derived points, is up to the
/// implementation. The owner must keep `num_chunks * chunk_span` at least as long as the
/// widest rollup window of any subscriber, or the data a slow aggregator needs may already
/// be evicted when it fires.
pub trait Aggregator: std::fmt::Debug + Send + Sync + 'static {
    fn signal(&self, owner: &AggMetric, ts: Timestamp);
}
