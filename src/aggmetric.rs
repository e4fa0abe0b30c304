//! Per-metric ring buffer of compressed chunks.
//!
//! An [`AggMetric`] keeps the last `num_chunks` chunk windows of one metric in memory, takes
//! in new samples in strictly increasing timestamp order, and signals its aggregators on
//! every accepted sample. All operations on one metric are serialized by that metric's own
//! mutex; distinct metrics never contend.
//!
//! Slot layout: the chunk whose aligned start is `s` lives at
//! `((s - first_start) / chunk_span) % num_chunks`. Writing a chunk into an occupied slot
//! evicts the previous occupant; that is the retention mechanism.

use crate::aggregator::Aggregator;
use crate::chunk::Chunk;
use crate::encoding::SeriesIter;
use crate::error::StoreError;
use crate::settings::StoreConfig;
use crate::telemetry::{store_metrics, StoreEvent, StoreEventListener};
use crate::types::{aligned_start, Timestamp, Value};

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of [`AggMetric::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The sample was stored and aggregators were signaled.
    Accepted,
    /// Duplicate or out-of-order sample; nothing changed. Expected under at-least-once
    /// delivery and not an error.
    Ignored { last_ts: Timestamp },
}

/// Point-in-time view of a metric's ring, for introspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    /// Aligned start of the very first sample ever recorded; `None` until then.
    pub first_start: Option<Timestamp>,
    /// Aligned start of the chunk currently being written.
    pub last_start: Timestamp,
    /// Timestamp of the latest accepted sample.
    pub last_ts: Timestamp,
    /// Aligned starts `[oldest, newest]` currently addressable by reads.
    pub retained_starts: Option<(Timestamp, Timestamp)>,
    /// One entry per ring slot, in slot order.
    pub slots: Vec<Option<SlotStats>>,
}

impl MetricStats {
    pub fn chunk_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn open_chunks(&self) -> usize {
        self.slots.iter().flatten().filter(|s| !s.sealed).count()
    }

    pub fn total_points(&self) -> usize {
        self.slots.iter().flatten().map(|s| s.points).sum()
    }
}

/// Occupant of a single ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStats {
    /// Aligned start of the chunk in the slot.
    pub start: Timestamp,
    pub points: usize,
    /// `false` only for the chunk still accepting samples.
    pub sealed: bool,
    /// Encoded size of the chunk's stream.
    pub bytes: usize,
}

#[derive(Debug)]
struct RingState {
    first_start: Option<Timestamp>,
    last_start: Timestamp,
    last_ts: Timestamp,
    chunks: Vec<Option<Chunk>>,
    aggregators: Vec<Arc<dyn Aggregator>>,
}

/// In-memory retention structure for a single metric key.
#[derive(Debug)]
pub struct AggMetric {
    key: String,
    chunk_span: u32,
    num_chunks: u32,
    events: Arc<dyn StoreEventListener>,
    state: Mutex<RingState>,
}

impl AggMetric {
    /// Creates an empty metric. Fails if `config` has a zero span or zero capacity.
    pub fn new(key: impl Into<String>, config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let num_chunks = config.num_chunks;
        Ok(AggMetric {
            key: key.into(),
            chunk_span: config.chunk_span,
            num_chunks,
            events: Arc::clone(&config.event_listener),
            state: Mutex::new(RingState {
                first_start: None,
                last_start: 0,
                last_ts: 0,
                chunks: (0..num_chunks).map(|_| None).collect(),
                aggregators: Vec::new(),
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn chunk_span(&self) -> u32 {
        self.chunk_span
    }

    pub fn num_chunks(&self) -> u32 {
        self.num_chunks
    }

    /// Attaches an aggregator. Signal order follows subscription order; no dedup.
    pub fn subscribe(&self, aggregator: Arc<dyn Aggregator>) -> Result<(), StoreError> {
        let mut state = self.state.lock()?;
        state.aggregators.push(aggregator);
        Ok(())
    }

    /// Records a sample.
    ///
    /// Samples with `ts <= last_ts` are dropped without touching state or signaling. When
    /// the sample falls into a later window than the previous one, the previous chunk is
    /// sealed and a new one is opened in the slot for the new window, evicting whatever
    /// occupied it. No placeholder chunks are created for skipped windows.
    ///
    /// Every subscribed aggregator is signaled with `ts` before the lock is released.
    pub fn add(&self, ts: Timestamp, value: Value) -> Result<AppendOutcome, StoreError> {
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        let start = aligned_start(ts, self.chunk_span);

        match state.first_start {
            None => {
                state.first_start = Some(start);
                state.last_start = start;
                self.open_chunk(state, 0, start).push(ts, value)?;
            }
            Some(first_start) => {
                if ts <= state.last_ts {
                    let last_ts = state.last_ts;
                    store_metrics::record_sample_ignored();
                    self.events.on_event(StoreEvent::SampleIgnored {
                        key: self.key.clone(),
                        ts,
                        last_ts,
                    });
                    return Ok(AppendOutcome::Ignored { last_ts });
                }

                let slot = self.slot_of(first_start, start);
                if start == state.last_start {
                    match state.chunks[slot].as_mut() {
                        Some(chunk) => chunk.push(ts, value)?,
                        None => self.open_chunk(state, slot, start).push(ts, value)?,
                    }
                } else {
                    // `start > last_start`: timestamps only move forward.
                    let prev_slot = self.slot_of(first_start, state.last_start);
                    self.seal_slot(state, prev_slot);
                    self.open_chunk(state, slot, start).push(ts, value)?;
                    state.last_start = start;
                }
            }
        }

        state.last_ts = ts;
        store_metrics::record_sample_accepted();
        self.signal_aggregators(state, ts);
        Ok(AppendOutcome::Accepted)
    }

    /// Reads `[from, to)` on behalf of an untrusted caller.
    ///
    /// The request is narrowed to the retained window rather than failing; a window lying
    /// entirely outside retention, or a metric with no data yet, yields no iterators.
    /// Returns one iterator per non-empty chunk, oldest first.
    pub fn get_checked(&self, from: Timestamp, to: Timestamp) -> Result<Vec<SeriesIter>, StoreError> {
        if from >= to {
            return Err(StoreError::InvalidRange { from, to });
        }
        let state = self.state.lock()?;
        let Some(first_start) = state.first_start else {
            return Ok(Vec::new());
        };

        let requested_first = aligned_start(from, self.chunk_span);
        let requested_last = aligned_start(to - 1, self.chunk_span);
        let oldest = self.oldest_retained(first_start, state.last_start);

        let first = requested_first.max(oldest);
        let last = requested_last.min(state.last_start);

        if requested_first < oldest || requested_last > state.last_start {
            let served = (first <= last).then(|| (first, last.saturating_add(self.chunk_span)));
            self.events.on_event(StoreEvent::ReadNarrowed {
                key: self.key.clone(),
                requested: (from, to),
                served,
            });
        }
        if first > last {
            return Ok(Vec::new());
        }
        Ok(self.select(&state, first_start, first, last))
    }

    /// Reads `[from, to)` on behalf of an internal caller that guarantees the range is sane.
    ///
    /// The returned iterators cover every chunk overlapping the range, so typically more
    /// than was asked for.
    ///
    /// The end of the range may reach past the newest chunk; it is served up to that chunk.
    ///
    /// # Panics
    /// If `from >= to`, if the metric holds no data, if the range starts before the oldest
    /// retained chunk, or if it starts after the newest one. Each of these is a bug in the
    /// caller.
    pub fn get_trusted(&self, from: Timestamp, to: Timestamp) -> Vec<SeriesIter> {
        assert!(from < to, "invalid request for {}: to must > from (from={}, to={})", self.key, from, to);
        let state = self.lock_or_die();
        match self.trusted_window(&state, from, to) {
            Ok((first_start, first, last)) => self.select(&state, first_start, first, last),
            Err(msg) => {
                // Release before panicking so the metric stays usable.
                drop(state);
                panic!("{}", msg);
            }
        }
    }

    fn trusted_window(
        &self,
        state: &RingState,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<(Timestamp, Timestamp, Timestamp), String> {
        let Some(first_start) = state.first_start else {
            return Err(format!("requested [{}, {}) from {} which holds no data", from, to, self.key));
        };
        let first = aligned_start(from, self.chunk_span);
        let oldest = self.oldest_retained(first_start, state.last_start);
        if first < oldest {
            return Err(format!(
                "requested a first start that is too old for {}: {} < oldest retained {}",
                self.key, first, oldest
            ));
        }
        if first > state.last_start {
            return Err(format!(
                "requested a first start that doesn't exist yet for {}: {} > {}",
                self.key, first, state.last_start
            ));
        }
        // The newest chunk is still being written; a range reaching past it is served up to it.
        let last = aligned_start(to - 1, self.chunk_span).min(state.last_start);
        Ok((first_start, first, last))
    }

    /// Snapshot of ring bookkeeping.
    pub fn stats(&self) -> Result<MetricStats, StoreError> {
        let state = self.state.lock()?;
        let retained_starts = state
            .first_start
            .map(|first| (self.oldest_retained(first, state.last_start), state.last_start));
        let slots = state
            .chunks
            .iter()
            .map(|c| {
                c.as_ref().map(|c| SlotStats {
                    start: c.start(),
                    points: c.len(),
                    sealed: c.is_sealed(),
                    bytes: c.encoded_len(),
                })
            })
            .collect();
        Ok(MetricStats {
            first_start: state.first_start,
            last_start: state.last_start,
            last_ts: state.last_ts,
            retained_starts,
            slots,
        })
    }

    /// Timestamp of the most recently accepted sample, if any.
    pub fn last_ts(&self) -> Result<Option<Timestamp>, StoreError> {
        let state = self.state.lock()?;
        Ok(state.first_start.map(|_| state.last_ts))
    }

    // --- ring arithmetic; callers hold the lock ---

    #[inline]
    fn slot_of(&self, first_start: Timestamp, start: Timestamp) -> usize {
        (((start - first_start) / self.chunk_span) % self.num_chunks) as usize
    }

    /// Oldest aligned start still guaranteed to be in the ring.
    #[inline]
    fn oldest_retained(&self, first_start: Timestamp, last_start: Timestamp) -> Timestamp {
        let window = (self.num_chunks - 1) * self.chunk_span;
        last_start.saturating_sub(window).max(first_start)
    }

    /// Iterators for every chunk with aligned start in `[first, last]`, oldest first.
    ///
    /// `first` and `last` must be aligned, lie within retention, and satisfy `first <= last`.
    /// A slot whose chunk belongs to a different window than the one it stands for here
    /// (never overwritten after a gap) is skipped.
    fn select(
        &self,
        state: &RingState,
        first_start: Timestamp,
        first: Timestamp,
        last: Timestamp,
    ) -> Vec<SeriesIter> {
        let first_slot = self.slot_of(first_start, first);
        let last_slot = self.slot_of(first_start, last);
        let span = self.chunk_span;

        ring_slots(first_slot, last_slot, self.num_chunks as usize)
            .zip((0u32..).map(|i| first + i * span))
            .filter_map(|(slot, expected)| match &state.chunks[slot] {
                Some(chunk) if chunk.start() == expected => Some(chunk.iter()),
                _ => None,
            })
            .collect()
    }

    fn open_chunk<'a>(&self, state: &'a mut RingState, slot: usize, start: Timestamp) -> &'a mut Chunk {
        if let Some(evicted) = state.chunks[slot].take() {
            store_metrics::record_chunk_evicted();
            self.events.on_event(StoreEvent::ChunkEvicted {
                key: self.key.clone(),
                start: evicted.start(),
                slot,
            });
        }
        self.events.on_event(StoreEvent::ChunkOpened {
            key: self.key.clone(),
            start,
            slot,
        });
        state.chunks[slot].insert(Chunk::new(start))
    }

    fn seal_slot(&self, state: &mut RingState, slot: usize) {
        if let Some(chunk) = state.chunks[slot].as_mut() {
            if chunk.seal() {
                store_metrics::record_chunk_sealed();
                self.events.on_event(StoreEvent::ChunkSealed {
                    key: self.key.clone(),
                    start: chunk.start(),
                    points: chunk.len(),
                    bytes: chunk.encoded_len(),
                });
            }
        }
    }

    fn signal_aggregators(&self, state: &RingState, ts: Timestamp) {
        for aggregator in &state.aggregators {
            aggregator.signal(self, ts);
        }
    }

    fn lock_or_die(&self) -> MutexGuard<'_, RingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => panic!("lock for {} poisoned: {}", self.key, poisoned),
        }
    }
}

/// Slot indexes from `first` to `last` inclusive in time order, wrapping past `len - 1`
/// back to `0` when `last < first`.
pub(crate) fn ring_slots(first: usize, last: usize, len: usize) -> std::iter::Chain<Range<usize>, Range<usize>> {
    let (head, tail) = if last >= first {
        (first..last + 1, 0..0)
    } else {
        (first..len, 0..last + 1)
    };
    head.chain(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct RecordingAggregator {
        seen: StdMutex<Vec<(String, Timestamp)>>,
    }

    impl Aggregator for RecordingAggregator {
        fn signal(&self, owner: &AggMetric, ts: Timestamp) {
            self.seen.lock().unwrap().push((owner.key().to_string(), ts));
        }
    }

    fn metric(span: u32, n: u32) -> AggMetric {
        AggMetric::new("test.metric", &StoreConfig::new(span, n)).unwrap()
    }

    fn drain(iters: Vec<SeriesIter>) -> Vec<(Timestamp, Value)> {
        iters.into_iter().flatten().collect()
    }

    fn starts(iters: &[SeriesIter]) -> Vec<Timestamp> {
        iters.iter().map(|it| it.start()).collect()
    }

    #[test]
    fn test_ring_slots_contiguous_and_wrapped() {
        assert_eq!(ring_slots(1, 3, 5).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(ring_slots(2, 2, 5).collect::<Vec<_>>(), vec![2]);
        assert_eq!(ring_slots(3, 1, 5).collect::<Vec<_>>(), vec![3, 4, 0, 1]);
        assert_eq!(ring_slots(4, 0, 5).collect::<Vec<_>>(), vec![4, 0]);
    }

    #[test]
    fn test_first_chunk_at_aligned_start_zero() {
        let m = metric(120, 5);
        assert_eq!(m.add(100, 1.0).unwrap(), AppendOutcome::Accepted);
        assert_eq!(m.add(130, 2.0).unwrap(), AppendOutcome::Accepted);

        let stats = m.stats().unwrap();
        assert_eq!(stats.first_start, Some(0));
        assert_eq!(stats.last_start, 120);
        assert_eq!(stats.slots[0].unwrap().start, 0);
        assert!(stats.slots[0].unwrap().sealed);
        assert_eq!(stats.slots[1].unwrap().start, 120);
        assert!(!stats.slots[1].unwrap().sealed);

        let iters = m.get_trusted(0, 250);
        assert_eq!(starts(&iters), vec![0, 120]);
        assert_eq!(drain(iters), vec![(100, 1.0), (130, 2.0)]);
    }

    #[test]
    fn test_timestamp_zero_is_a_valid_first_sample() {
        let m = metric(60, 3);
        assert_eq!(m.add(0, 5.0).unwrap(), AppendOutcome::Accepted);
        assert_eq!(m.last_ts().unwrap(), Some(0));
        assert_eq!(m.add(0, 6.0).unwrap(), AppendOutcome::Ignored { last_ts: 0 });
        assert_eq!(drain(m.get_trusted(0, 1)), vec![(0, 5.0)]);
    }

    #[test]
    fn test_duplicate_and_old_samples_are_ignored() {
        let m = metric(60, 4);
        m.add(1000, 1.0).unwrap();
        m.add(1010, 2.0).unwrap();
        let before = m.stats().unwrap();

        assert_eq!(m.add(1010, 9.0).unwrap(), AppendOutcome::Ignored { last_ts: 1010 });
        assert_eq!(m.add(900, 9.0).unwrap(), AppendOutcome::Ignored { last_ts: 1010 });

        assert_eq!(m.stats().unwrap(), before);
        assert_eq!(drain(m.get_trusted(960, 1020)), vec![(1000, 1.0), (1010, 2.0)]);
    }

    #[test]
    fn test_crossing_boundary_seals_exactly_one_chunk() {
        let m = metric(10, 4);
        for ts in [1, 5, 9] {
            m.add(ts, ts as f64).unwrap();
        }
        let stats = m.stats().unwrap();
        assert_eq!(stats.chunk_count(), 1);
        assert_eq!(stats.open_chunks(), 1);

        m.add(10, 10.0).unwrap();
        let stats = m.stats().unwrap();
        assert_eq!(stats.chunk_count(), 2);
        assert_eq!(stats.open_chunks(), 1);
        assert_eq!(stats.slots[0].unwrap().points, 3);
        assert_eq!(stats.slots[1].unwrap().points, 1);
    }

    #[test]
    fn test_gap_yields_fewer_iterators() {
        let m = metric(10, 5);
        m.add(5, 1.0).unwrap();
        m.add(35, 2.0).unwrap();
        let iters = m.get_trusted(0, 40);
        assert_eq!(starts(&iters), vec![0, 30]);
    }

    #[test]
    fn test_stale_slot_from_earlier_cycle_is_skipped() {
        let m = metric(10, 3);
        m.add(5, 1.0).unwrap(); // slot 0
        m.add(15, 2.0).unwrap(); // slot 1
        m.add(25, 3.0).unwrap(); // slot 2
        m.add(45, 4.0).unwrap(); // start 40 -> slot 1; slot 0 still holds start 0

        let stats = m.stats().unwrap();
        assert_eq!(stats.retained_starts, Some((20, 40)));
        assert_eq!(stats.slots[0].unwrap().start, 0);

        // Window [20, 40]: slots 2, 0, 1. Slot 0 would stand for start 30 but holds 0.
        let iters = m.get_trusted(20, 50);
        assert_eq!(starts(&iters), vec![20, 40]);
        assert_eq!(drain(iters), vec![(25, 3.0), (45, 4.0)]);
    }

    #[test]
    fn test_checked_read_narrows_to_retention() {
        let m = metric(10, 3);
        for ts in (5..60).step_by(10) {
            m.add(ts, ts as f64).unwrap();
        }
        // last_start 50, retained starts 30..=50
        let iters = m.get_checked(0, 1000).unwrap();
        assert_eq!(starts(&iters), vec![30, 40, 50]);
        assert_eq!(drain(iters), vec![(35, 35.0), (45, 45.0), (55, 55.0)]);
    }

    #[test]
    fn test_checked_read_outside_retention_is_empty() {
        let m = metric(10, 3);
        for ts in (5..60).step_by(10) {
            m.add(ts, ts as f64).unwrap();
        }
        assert!(m.get_checked(0, 20).unwrap().is_empty());
        assert!(m.get_checked(100, 200).unwrap().is_empty());
    }

    #[test]
    fn test_checked_read_on_empty_metric() {
        let m = metric(10, 3);
        assert!(m.get_checked(0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_ranges() {
        let m = metric(10, 3);
        assert!(matches!(
            m.get_checked(50, 50),
            Err(StoreError::InvalidRange { from: 50, to: 50 })
        ));
        assert!(matches!(
            m.get_checked(80, 10),
            Err(StoreError::InvalidRange { from: 80, to: 10 })
        ));
        assert_eq!(m.add(1, 1.0).unwrap(), AppendOutcome::Accepted);
    }

    #[test]
    #[should_panic(expected = "to must > from")]
    fn test_trusted_read_rejects_empty_range() {
        let m = metric(10, 3);
        m.add(1, 1.0).unwrap();
        m.get_trusted(5, 5);
    }

    #[test]
    #[should_panic(expected = "too old")]
    fn test_trusted_read_of_evicted_range_panics() {
        let m = metric(10, 3);
        for ts in (5..60).step_by(10) {
            m.add(ts, ts as f64).unwrap();
        }
        m.get_trusted(0, 20);
    }

    #[test]
    #[should_panic(expected = "doesn't exist yet")]
    fn test_trusted_read_starting_after_newest_panics() {
        let m = metric(10, 3);
        m.add(5, 1.0).unwrap();
        m.get_trusted(10, 20);
    }

    #[test]
    fn test_trusted_read_end_is_clamped_to_newest_chunk() {
        let m = metric(120, 5);
        m.add(100, 1.0).unwrap();
        m.add(130, 2.0).unwrap();

        // `to` lies past last_ts and past the newest window.
        let iters = m.get_trusted(0, 250);
        assert_eq!(starts(&iters), vec![0, 120]);
        assert_eq!(drain(m.get_trusted(120, 10_000)), vec![(130, 2.0)]);
        assert_eq!(drain(m.get_trusted(125, 131)), vec![(130, 2.0)]);

        // Still usable: nothing panicked while the lock was held.
        assert_eq!(m.add(131, 3.0).unwrap(), AppendOutcome::Accepted);
    }

    #[test]
    #[should_panic(expected = "holds no data")]
    fn test_trusted_read_of_empty_metric_panics() {
        metric(10, 3).get_trusted(0, 10);
    }

    #[test]
    fn test_signal_fan_out_in_subscription_order() {
        let m = metric(60, 2);
        let a = Arc::new(RecordingAggregator::default());
        let b = Arc::new(RecordingAggregator::default());
        m.subscribe(a.clone()).unwrap();
        m.subscribe(b.clone()).unwrap();
        m.subscribe(a.clone()).unwrap();

        m.add(10, 1.0).unwrap();
        m.add(10, 1.0).unwrap(); // ignored, no signal
        m.add(70, 2.0).unwrap();

        let key = "test.metric".to_string();
        assert_eq!(
            *a.seen.lock().unwrap(),
            vec![(key.clone(), 10), (key.clone(), 10), (key.clone(), 70), (key.clone(), 70)]
        );
        assert_eq!(*b.seen.lock().unwrap(), vec![(key.clone(), 10), (key, 70)]);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            AggMetric::new("k", &StoreConfig::new(0, 3)),
            Err(StoreError::Config(_))
        ));
    }
}
