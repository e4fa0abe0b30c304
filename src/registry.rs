use crate::aggmetric::{AggMetric, AppendOutcome};
use crate::error::StoreError;
use crate::settings::StoreConfig;
use crate::types::{Point, Timestamp, Value};

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Outcome counts for a bulk ingest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub ignored: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: AppendOutcome) {
        match outcome {
            AppendOutcome::Accepted => self.accepted += 1,
            AppendOutcome::Ignored { .. } => self.ignored += 1,
        }
    }

    fn merge(self, other: BatchSummary) -> BatchSummary {
        BatchSummary {
            accepted: self.accepted + other.accepted,
            ignored: self.ignored + other.ignored,
        }
    }
}

/// All in-memory metrics of a process, one [`AggMetric`] per key.
///
/// The map lock only guards key lookup and insertion. Sample writes and reads go through
/// the metric's own lock, so distinct keys are ingested and read fully in parallel.
#[derive(Debug)]
pub struct AggMetrics {
    config: StoreConfig,
    metrics: RwLock<HashMap<String, Arc<AggMetric>>>,
}

impl AggMetrics {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn get(&self, key: &str) -> Result<Option<Arc<AggMetric>>, StoreError> {
        let metrics = self.metrics.read()?;
        Ok(metrics.get(key).cloned())
    }

    /// Returns the metric for `key`, creating an empty one on first use.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<AggMetric>, StoreError> {
        if let Some(metric) = self.get(key)? {
            return Ok(metric);
        }
        let mut metrics = self.metrics.write()?;
        // Another writer may have created it between the two locks.
        if let Some(metric) = metrics.get(key) {
            return Ok(Arc::clone(metric));
        }
        let metric = Arc::new(AggMetric::new(key, &self.config)?);
        metrics.insert(key.to_string(), Arc::clone(&metric));
        Ok(metric)
    }

    /// Appends one sample to `key`, creating the metric if needed.
    pub fn add(&self, key: &str, ts: Timestamp, value: Value) -> Result<AppendOutcome, StoreError> {
        self.get_or_create(key)?.add(ts, value)
    }

    /// Appends batches for many keys. Keys are processed in parallel; the points of one key
    /// are applied in the order given, so out-of-order points within a batch are ignored
    /// exactly as they would be one at a time.
    pub fn add_batch(&self, batch: HashMap<String, Vec<Point>>) -> Result<BatchSummary, StoreError> {
        let work = batch
            .into_iter()
            .filter(|(_, points)| !points.is_empty())
            .map(|(key, points)| -> Result<_, StoreError> { Ok((self.get_or_create(&key)?, points)) })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let summaries = work
            .into_par_iter()
            .map(|(metric, points)| -> Result<BatchSummary, StoreError> {
                let mut summary = BatchSummary::default();
                for point in points {
                    summary.record(metric.add(point.ts, point.value)?);
                }
                Ok(summary)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(summaries
            .into_iter()
            .fold(BatchSummary::default(), BatchSummary::merge))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.metrics.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.metrics.read()?.is_empty())
    }

    /// All known keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.metrics.read()?.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
