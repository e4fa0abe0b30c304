//! Store configuration and layered loading.
//!
//! Sources, in precedence order: defaults, an optional TOML file, and environment
//! variables (`RINGTANK_*`, e.g. `RINGTANK_CHUNK_SPAN=7200`).

use std::path::Path;
use std::sync::Arc;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::StoreError;
use crate::telemetry::{noop_event_listener, StoreEventListener};

/// Default span of a single chunk, in seconds.
pub const DEFAULT_CHUNK_SPAN: u32 = 60 * 2;
/// Default number of chunks kept per metric.
pub const DEFAULT_NUM_CHUNKS: u32 = 5;

const ENV_PREFIX: &str = "RINGTANK";

/// Configuration shared by every [`AggMetric`](crate::AggMetric) created from it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Duration in seconds each chunk covers. Chunk starts are aligned to multiples of it.
    pub chunk_span: u32,
    /// Ring capacity. `num_chunks * chunk_span` must cover the widest aggregation window
    /// of any subscribed aggregator.
    pub num_chunks: u32,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn StoreEventListener>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_span: DEFAULT_CHUNK_SPAN,
            num_chunks: DEFAULT_NUM_CHUNKS,
            event_listener: noop_event_listener(),
        }
    }
}

impl StoreConfig {
    pub fn new(chunk_span: u32, num_chunks: u32) -> Self {
        StoreConfig {
            chunk_span,
            num_chunks,
            ..Default::default()
        }
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn StoreEventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    /// Span of history representable at once: `num_chunks * chunk_span` seconds.
    pub fn retention_secs(&self) -> u64 {
        self.num_chunks as u64 * self.chunk_span as u64
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.chunk_span == 0 {
            return Err(StoreError::Config("chunk_span must be > 0".to_string()));
        }
        if self.num_chunks == 0 {
            return Err(StoreError::Config("num_chunks must be > 0".to_string()));
        }
        // Slot arithmetic stays in u32; the whole ring must be addressable.
        if self.retention_secs() > u32::MAX as u64 {
            return Err(StoreError::Config(format!(
                "num_chunks * chunk_span overflows the timestamp range: {} * {}",
                self.num_chunks, self.chunk_span
            )));
        }
        Ok(())
    }
}

/// File/env config. Every field optional for layering.
#[derive(Debug, Default, Deserialize)]
pub struct StoreFileConfig {
    pub chunk_span: Option<u32>,
    pub num_chunks: Option<u32>,
}

impl StoreFileConfig {
    /// Only overwrites fields that are `Some`.
    pub fn merge_into(&self, base: &mut StoreConfig) {
        if let Some(span) = self.chunk_span {
            base.chunk_span = span;
        }
        if let Some(n) = self.num_chunks {
            base.num_chunks = n;
        }
    }
}

/// Loads a validated [`StoreConfig`] from defaults, `path` (if given) and `RINGTANK_*` env vars.
pub fn load_store_config(path: Option<&Path>) -> Result<StoreConfig, StoreError> {
    load_store_config_with_prefix(path, ENV_PREFIX)
}

/// Like [`load_store_config`] with a custom environment prefix.
pub fn load_store_config_with_prefix(
    path: Option<&Path>,
    env_prefix: &str,
) -> Result<StoreConfig, StoreError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(StoreError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| StoreError::Config(e.to_string()))?;
    let partial: StoreFileConfig = merged
        .try_deserialize()
        .map_err(|e| StoreError::Config(e.to_string()))?;

    let mut cfg = StoreConfig::default();
    partial.merge_into(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}
