//! Fleet Telemetry Configuration
//!
//! Settings for the metadata cache, ingestion workers, priority channels,
//! record store and logging. Every section has defaults, so a partial TOML
//! file (or none at all) is enough. Environment variables override the file:
//! `TELEMETRY__CACHE__REDIS_URL=redis://cache:6379` sets `cache.redis_url`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};
use crate::types::VehicleMetadata;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TELEMETRY";

/// Main configuration for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Metadata cache configuration
    pub cache: CacheConfig,

    /// Ingestion worker configuration
    pub pipeline: PipelineConfig,

    /// Priority channel configuration
    pub channels: ChannelConfig,

    /// Persisted record store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Metadata cache configuration (Redis + in-memory)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection URL
    pub redis_url: Option<String>,

    /// Use Redis as the backing store instead of the in-process cache
    pub enable_redis: bool,

    /// Upper bound on waiting for or opening a Redis connection (milliseconds)
    pub redis_timeout_ms: u64,

    /// Memory cache size in bytes
    pub memory_cache_size_bytes: u64,

    /// TTL for synthesized default metadata (seconds)
    pub default_ttl_seconds: u64,

    /// Metadata used on miss and on backing-store faults
    pub fallback_metadata: VehicleMetadata,
}

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of files processed concurrently
    pub worker_threads: u32,

    /// Capacity of each in-process priority channel
    pub channel_buffer: u32,

    /// Maximum messages handed to the consumer per batch
    pub consumer_batch_size: u32,
}

/// Priority channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name of the high-priority channel
    pub high_priority_name: String,

    /// Name of the low-priority channel
    pub low_priority_name: String,

    /// Redis list used as the high-priority queue
    pub high_priority_list: Option<String>,

    /// Redis list used as the low-priority queue
    pub low_priority_list: Option<String>,
}

/// Persisted record store configuration (redb)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file path (None for in-memory)
    pub database_path: Option<PathBuf>,

    /// Use in-memory storage
    pub use_memory_storage: bool,

    /// Days until a persisted record expires
    pub retention_days: u32,

    /// Cache size in bytes
    pub cache_size_bytes: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: Some("redis://localhost:6379".to_string()),
            enable_redis: false,
            redis_timeout_ms: 500,
            memory_cache_size_bytes: 67_108_864, // 64MB
            default_ttl_seconds: 3600,           // 1 hour
            fallback_metadata: VehicleMetadata::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: u32::try_from(num_cpus::get()).unwrap_or(4),
            channel_buffer: 1024,
            consumer_batch_size: 10,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            high_priority_name: "high".to_string(),
            low_priority_name: "low".to_string(),
            high_priority_list: None,
            low_priority_list: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: Some(PathBuf::from("./data/telemetry.redb")),
            use_memory_storage: false,
            retention_days: 30,
            cache_size_bytes: 67_108_864, // 64MB
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineSettings {
    /// Load settings from an optional TOML file plus environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        tracing::debug!(?path, "Pipeline settings loaded");
        Ok(settings)
    }

    /// Parse settings from TOML text without consulting the environment
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid settings TOML
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the effective settings as TOML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_toml_string(&self) -> PipelineResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::configuration(format!("Cannot render settings: {e}")))
    }

    /// Reject settings the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> PipelineResult<()> {
        if self.pipeline.worker_threads == 0 {
            return Err(PipelineError::configuration(
                "pipeline.worker_threads must be at least 1",
            ));
        }
        if self.pipeline.channel_buffer == 0 {
            return Err(PipelineError::configuration(
                "pipeline.channel_buffer must be at least 1",
            ));
        }
        if self.pipeline.consumer_batch_size == 0 {
            return Err(PipelineError::configuration(
                "pipeline.consumer_batch_size must be at least 1",
            ));
        }
        if self.cache.enable_redis && self.cache.redis_url.is_none() {
            return Err(PipelineError::configuration(
                "cache.enable_redis requires cache.redis_url",
            ));
        }
        if self.cache.enable_redis && self.cache.redis_timeout_ms == 0 {
            return Err(PipelineError::configuration(
                "cache.redis_timeout_ms must be at least 1",
            ));
        }
        if !self.store.use_memory_storage && self.store.database_path.is_none() {
            return Err(PipelineError::configuration(
                "store.database_path is required unless store.use_memory_storage is set",
            ));
        }
        if self.channels.high_priority_name == self.channels.low_priority_name {
            return Err(PipelineError::configuration(
                "high and low priority channels must have distinct names",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() -> PipelineResult<()> {
        let settings = PipelineSettings::default();
        settings.validate()?;
        assert_eq!(settings.cache.default_ttl_seconds, 3600);
        assert_eq!(settings.store.retention_days, 30);
        assert_eq!(settings.cache.fallback_metadata.max_speed, 120.0);
        assert_eq!(settings.cache.fallback_metadata.service_region, "default");
        Ok(())
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> PipelineResult<()> {
        let settings = PipelineSettings::from_toml_str(
            r#"
            [store]
            use_memory_storage = true

            [cache.fallback_metadata]
            max_speed = 90.0
            depot_lat = 40.0
            depot_lon = -100.0
            service_region = "CHI"
            "#,
        )?;

        assert!(settings.store.use_memory_storage);
        assert_eq!(settings.store.retention_days, 30);
        assert_eq!(settings.cache.fallback_metadata.service_region, "CHI");
        assert_eq!(settings.channels.high_priority_name, "high");
        Ok(())
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut settings = PipelineSettings::default();
        settings.pipeline.worker_threads = 0;
        assert!(settings.validate().is_err());

        let mut settings = PipelineSettings::default();
        settings.channels.low_priority_name = "high".to_string();
        assert!(settings.validate().is_err());

        let mut settings = PipelineSettings::default();
        settings.store.database_path = None;
        assert!(settings.validate().is_err());

        let mut settings = PipelineSettings::default();
        settings.cache.enable_redis = true;
        settings.cache.redis_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() -> PipelineResult<()> {
        let settings = PipelineSettings::default();
        let text = settings.to_toml_string()?;
        let parsed = PipelineSettings::from_toml_str(&text)?;
        assert_eq!(parsed, settings);
        Ok(())
    }
}
