//! Import configuration
//!
//! Priority when assembled by the CLI: flags > environment > config file > defaults.
//! Environment variables use the `NEXUS_IMPORT_` prefix, e.g.
//! `NEXUS_IMPORT_BATCH_SIZE` or `NEXUS_IMPORT_MAX_MEMORY_BYTES`.

use crate::cache::{fraction_of, probe_memory};
use crate::staging::StageConfig;
use crate::store::StoreSettings;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "NEXUS_IMPORT_";

/// Share of available memory used when no maximum is configured
const DEFAULT_MEMORY_PERCENT: u8 = 90;

/// Settings of one import run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Items per batch
    pub batch_size: usize,
    /// Batches buffered between two steps
    pub max_queue_size: usize,
    /// Upper bound on processors per step
    pub max_processors: usize,
    /// Degree at which a node becomes dense
    pub dense_node_threshold: u64,
    /// Memory the caches may use; `None` means 90% of available memory
    pub max_memory_bytes: Option<u64>,
    /// Free memory; `None` means ask the OS
    pub available_memory_bytes: Option<u64>,
    /// Memory reserved for ordinary allocations; `None` means the estimated need
    pub heap_size_bytes: Option<u64>,
    /// Bytes per string record
    pub string_block_size: usize,
    /// Bytes per array record
    pub array_block_size: usize,
    /// Bytes per label record
    pub label_block_size: usize,
    /// Bad entries tolerated before the import fails
    pub bad_tolerance: u64,
    /// Collect relationships with unknown endpoints instead of failing
    pub skip_bad_relationships: bool,
    /// Collect nodes with an already seen input id instead of failing
    pub skip_duplicate_nodes: bool,
    /// Milliseconds between progress checks
    pub progress_interval_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let settings = StoreSettings::default();
        let stage = StageConfig::default();
        Self {
            batch_size: stage.batch_size,
            max_queue_size: stage.max_queue_size,
            max_processors: stage.max_processors,
            dense_node_threshold: 50,
            max_memory_bytes: None,
            available_memory_bytes: None,
            heap_size_bytes: None,
            string_block_size: settings.string_block_size,
            array_block_size: settings.array_block_size,
            label_block_size: settings.label_block_size,
            bad_tolerance: 1000,
            skip_bad_relationships: true,
            skip_duplicate_nodes: true,
            progress_interval_ms: 1000,
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
    let key = format!("{}{}", ENV_PREFIX, name);
    match std::env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("Invalid {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

impl ImportConfig {
    /// Defaults overlaid with `NEXUS_IMPORT_*` variables
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env()
    }

    /// Overlay `NEXUS_IMPORT_*` variables onto this configuration
    pub fn overlay_env(mut self) -> Result<Self> {
        macro_rules! overlay {
            ($field:ident, $name:literal) => {
                if let Some(value) = env_value($name)? {
                    self.$field = value;
                }
            };
            ($field:ident, $name:literal, optional) => {
                if let Some(value) = env_value($name)? {
                    self.$field = Some(value);
                }
            };
        }
        overlay!(batch_size, "BATCH_SIZE");
        overlay!(max_queue_size, "MAX_QUEUE_SIZE");
        overlay!(max_processors, "MAX_PROCESSORS");
        overlay!(dense_node_threshold, "DENSE_NODE_THRESHOLD");
        overlay!(max_memory_bytes, "MAX_MEMORY_BYTES", optional);
        overlay!(available_memory_bytes, "AVAILABLE_MEMORY_BYTES", optional);
        overlay!(heap_size_bytes, "HEAP_SIZE_BYTES", optional);
        overlay!(string_block_size, "STRING_BLOCK_SIZE");
        overlay!(array_block_size, "ARRAY_BLOCK_SIZE");
        overlay!(label_block_size, "LABEL_BLOCK_SIZE");
        overlay!(bad_tolerance, "BAD_TOLERANCE");
        overlay!(skip_bad_relationships, "SKIP_BAD_RELATIONSHIPS");
        overlay!(skip_duplicate_nodes, "SKIP_DUPLICATE_NODES");
        overlay!(progress_interval_ms, "PROGRESS_INTERVAL_MS");
        Ok(self)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("Invalid import config: {}", e)))
    }

    /// Reject settings the importer cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size as u64),
            ("max_queue_size", self.max_queue_size as u64),
            ("max_processors", self.max_processors as u64),
            ("dense_node_threshold", self.dense_node_threshold),
            ("string_block_size", self.string_block_size as u64),
            ("array_block_size", self.array_block_size as u64),
            ("label_block_size", self.label_block_size as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{} must be positive", name)));
        }
        if self.max_memory_bytes == Some(0) {
            return Err(Error::config("max_memory_bytes must be positive"));
        }
        Ok(())
    }

    /// Set the number of processors
    pub fn with_max_processors(mut self, processors: usize) -> Self {
        self.max_processors = processors;
        self
    }

    /// Set the dense node threshold
    pub fn with_dense_node_threshold(mut self, threshold: u64) -> Self {
        self.dense_node_threshold = threshold;
        self
    }

    /// Set the cache memory budget
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Free memory, configured or probed; zero when neither is known
    pub fn available_memory(&self) -> u64 {
        self.available_memory_bytes
            .or_else(|| probe_memory().map(|stats| stats.available))
            .unwrap_or(0)
    }

    /// Memory budget of the caches
    pub fn max_memory(&self) -> u64 {
        self.max_memory_bytes
            .unwrap_or_else(|| fraction_of(self.available_memory(), DEFAULT_MEMORY_PERCENT))
    }

    /// Memory reserved for ordinary allocations, or `estimated` when not configured
    pub fn heap_size(&self, estimated: u64) -> u64 {
        self.heap_size_bytes.unwrap_or(estimated)
    }

    /// Block sizes for the dynamic stores
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            string_block_size: self.string_block_size,
            array_block_size: self.array_block_size,
            label_block_size: self.label_block_size,
            ..StoreSettings::default()
        }
    }

    /// Sizing of every stage
    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            batch_size: self.batch_size,
            max_queue_size: self.max_queue_size,
            max_processors: self.max_processors,
        }
    }

    /// Interval between progress checks
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ImportConfig::default();
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.dense_node_threshold, 50);
        assert_eq!(config.bad_tolerance, 1000);
        assert!(config.skip_bad_relationships);
        assert!(config.max_processors >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zeros() {
        let config = ImportConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("batch_size")));
        assert!(ImportConfig::default().with_dense_node_threshold(0).validate().is_err());
        assert!(ImportConfig::default().with_max_processors(0).validate().is_err());
        assert!(ImportConfig::default().with_max_memory(0).validate().is_err());
    }

    #[test]
    fn test_memory_defaults() {
        let config = ImportConfig {
            available_memory_bytes: Some(1000),
            ..Default::default()
        };
        assert_eq!(config.max_memory(), 900);
        assert_eq!(config.heap_size(64), 64);

        let config = ImportConfig {
            heap_size_bytes: Some(10),
            ..config.with_max_memory(500)
        };
        assert_eq!(config.max_memory(), 500);
        assert_eq!(config.heap_size(64), 10);
    }

    #[test]
    fn test_from_toml_keeps_defaults() {
        let config = ImportConfig::from_toml("batch_size = 42\nmax_memory_bytes = 1024\n").unwrap();
        assert_eq!(config.batch_size, 42);
        assert_eq!(config.max_memory_bytes, Some(1024));
        assert_eq!(config.label_block_size, 60);
        assert!(ImportConfig::from_toml("batch_size = \"many\"").is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = ImportConfig {
            string_block_size: 64,
            ..ImportConfig::default().with_batch_size(7)
        };
        assert_eq!(config.store_settings().string_block_size, 64);
        assert_eq!(config.stage_config().batch_size, 7);
    }

    #[test]
    #[ignore = "Environment variable tests can have race conditions when run in parallel"]
    fn test_config_from_env() {
        unsafe {
            std::env::set_var("NEXUS_IMPORT_BATCH_SIZE", "250");
            std::env::set_var("NEXUS_IMPORT_MAX_MEMORY_BYTES", "4096");
        }
        let config = ImportConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.max_memory_bytes, Some(4096));

        unsafe {
            std::env::set_var("NEXUS_IMPORT_BATCH_SIZE", "lots");
        }
        assert!(matches!(ImportConfig::from_env(), Err(Error::Config(_))));

        unsafe {
            std::env::remove_var("NEXUS_IMPORT_BATCH_SIZE");
            std::env::remove_var("NEXUS_IMPORT_MAX_MEMORY_BYTES");
        }
    }
}
