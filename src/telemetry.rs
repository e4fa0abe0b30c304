use std::sync::Arc;

use crate::types::Timestamp;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
///
/// Events are emitted while the owning metric's lock is held, so implementations must be
/// cheap and must not call back into the store.
pub trait StoreEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StoreEvent);
}

/// Structured events emitted by the ring store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A sample with `ts <= last_ts` was dropped without touching state.
    SampleIgnored { key: String, ts: Timestamp, last_ts: Timestamp },

    ChunkOpened { key: String, start: Timestamp, slot: usize },
    ChunkSealed { key: String, start: Timestamp, points: usize, bytes: usize },
    /// A ring slot was reused; the previous occupant is gone.
    ChunkEvicted { key: String, start: Timestamp, slot: usize },

    /// A checked read was clamped to the retained window.
    ReadNarrowed {
        key: String,
        requested: (Timestamp, Timestamp),
        served: Option<(Timestamp, Timestamp)>,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl StoreEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StoreEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn StoreEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation via the `metrics` facade.
///
/// Emitting is effectively a no-op until a recorder is installed. With the `prometheus`
/// feature, [`store_metrics::InProcessPrometheus`] installs one and renders exposition text
/// in-process without an HTTP server.
pub mod store_metrics {
    use ::metrics::{describe_counter, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
    #[cfg(feature = "prometheus")]
    use std::fmt;

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const SAMPLES_ACCEPTED: &str = "ringtank_samples_accepted";
    pub const SAMPLES_IGNORED: &str = "ringtank_samples_ignored";
    pub const CHUNKS_SEALED: &str = "ringtank_chunks_sealed";
    pub const CHUNKS_EVICTED: &str = "ringtank_chunks_evicted";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// Only counters are recorded, so the recorder needs no periodic upkeep.
    #[cfg(feature = "prometheus")]
    #[derive(Clone)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl fmt::Debug for InProcessPrometheus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("InProcessPrometheus").finish_non_exhaustive()
        }
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs the global Prometheus recorder. Succeeds once per process.
        pub fn install() -> Result<Self, MetricsInitError> {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;
            describe_all();
            Ok(Self { handle })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_sample_accepted() {
        ::metrics::counter!(SAMPLES_ACCEPTED).increment(1);
    }

    #[inline]
    pub fn record_sample_ignored() {
        ::metrics::counter!(SAMPLES_IGNORED).increment(1);
    }

    #[inline]
    pub fn record_chunk_sealed() {
        ::metrics::counter!(CHUNKS_SEALED).increment(1);
    }

    #[inline]
    pub fn record_chunk_evicted() {
        ::metrics::counter!(CHUNKS_EVICTED).increment(1);
    }

    /// Registers descriptions for every metric with the installed recorder.
    pub fn describe_all() {
        describe_counter!(
            SAMPLES_ACCEPTED,
            Unit::Count,
            "Total number of samples accepted by AggMetric::add."
        );
        describe_counter!(
            SAMPLES_IGNORED,
            Unit::Count,
            "Total number of duplicate or out-of-order samples dropped by AggMetric::add."
        );
        describe_counter!(
            CHUNKS_SEALED,
            Unit::Count,
            "Total number of chunks sealed after the store moved past their window."
        );
        describe_counter!(
            CHUNKS_EVICTED,
            Unit::Count,
            "Total number of chunks overwritten when the ring wrapped."
        );
    }
}
