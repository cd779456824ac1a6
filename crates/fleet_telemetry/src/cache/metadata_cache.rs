//! Read-through vehicle metadata cache
//!
//! `get` never fails. A genuine miss synthesizes the configured fallback,
//! writes it back with the default TTL and returns it; a backing-store fault
//! returns the same fallback without writing. Callers of [`MetadataCache::get`]
//! cannot tell the two apart, [`MetadataCache::lookup`] can.
//!
//! Concurrent misses for the same vehicle race to write identical defaults,
//! which is harmless. Seeded metadata written afterwards simply wins.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::{ErrorCode, PipelineResult};
use crate::types::VehicleMetadata;

use super::Cache;

/// Where a looked-up value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataOrigin {
    /// Found in the backing store
    Cached,
    /// Key absent, fallback synthesized and written back
    Default,
    /// Backing store failed or held garbage, fallback returned
    Fault,
}

/// Metadata together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataLookup {
    /// Metadata to enrich with
    pub metadata: VehicleMetadata,
    /// Where it came from
    pub origin: MetadataOrigin,
}

/// Lookup counters by origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetadataCacheCounters {
    /// Lookups served from the backing store
    pub cached: u64,
    /// Lookups that synthesized a default
    pub defaults: u64,
    /// Lookups that hit a backing-store fault
    pub faults: u64,
}

/// Read-through cache mapping vehicle ids to metadata
pub struct MetadataCache {
    backend: Arc<dyn Cache>,
    fallback: VehicleMetadata,
    default_ttl_seconds: u64,
    counters: parking_lot::Mutex<MetadataCacheCounters>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("fallback", &self.fallback)
            .field("default_ttl_seconds", &self.default_ttl_seconds)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    /// Wrap a backing store
    #[must_use]
    pub fn new(backend: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            backend,
            fallback: config.fallback_metadata.clone(),
            default_ttl_seconds: config.default_ttl_seconds,
            counters: parking_lot::Mutex::new(MetadataCacheCounters::default()),
        }
    }

    /// Metadata for `vehicle_id`, never failing
    pub async fn get(&self, vehicle_id: &str) -> VehicleMetadata {
        self.lookup(vehicle_id).await.metadata
    }

    /// Metadata for `vehicle_id` tagged with its origin
    pub async fn lookup(&self, vehicle_id: &str) -> MetadataLookup {
        let origin = match self.backend.get(vehicle_id).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<VehicleMetadata>(&bytes) {
                Ok(metadata) => {
                    self.counters.lock().cached += 1;
                    return MetadataLookup {
                        metadata,
                        origin: MetadataOrigin::Cached,
                    };
                }
                Err(e) => {
                    tracing::error!(
                        vehicle_id,
                        code = ErrorCode::CacheRead.as_u16(),
                        "Corrupt cached metadata, using defaults: {e}"
                    );
                    MetadataOrigin::Fault
                }
            },
            Ok(None) => {
                self.fill_default(vehicle_id).await;
                MetadataOrigin::Default
            }
            Err(e) => {
                tracing::error!(
                    vehicle_id,
                    code = e.code().as_u16(),
                    "Error getting metadata, using defaults: {e}"
                );
                MetadataOrigin::Fault
            }
        };

        {
            let mut counters = self.counters.lock();
            if origin == MetadataOrigin::Default {
                counters.defaults += 1;
            } else {
                counters.faults += 1;
            }
        }

        MetadataLookup {
            metadata: self.fallback.clone(),
            origin,
        }
    }

    /// Write the fallback for a missing key with the default TTL
    async fn fill_default(&self, vehicle_id: &str) {
        let bytes = match serde_json::to_vec(&self.fallback) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(vehicle_id, "Cannot encode default metadata: {e}");
                return;
            }
        };

        if let Err(e) = self
            .backend
            .set(vehicle_id, &bytes, Some(self.default_ttl_seconds))
            .await
        {
            tracing::warn!(
                vehicle_id,
                code = ErrorCode::CacheWrite.as_u16(),
                "Failed to cache default metadata: {e}"
            );
        } else {
            tracing::debug!(
                vehicle_id,
                ttl_seconds = self.default_ttl_seconds,
                "Cached default metadata"
            );
        }
    }

    /// Store real metadata for a vehicle, without expiry
    ///
    /// # Errors
    ///
    /// Returns error if the backing store rejects the write
    pub async fn seed(&self, vehicle_id: &str, metadata: &VehicleMetadata) -> PipelineResult<()> {
        let bytes = serde_json::to_vec(metadata)?;
        self.backend.set(vehicle_id, &bytes, None).await
    }

    /// Seed every entry of a `{vehicle_id: metadata}` JSON document
    ///
    /// Returns the number of vehicles seeded.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not parse or a write fails
    pub async fn seed_from_reader<R: Read>(&self, reader: R) -> PipelineResult<usize> {
        let entries: BTreeMap<String, VehicleMetadata> = serde_json::from_reader(reader)?;

        for (vehicle_id, metadata) in &entries {
            self.seed(vehicle_id, metadata).await?;
        }

        tracing::info!("Seeded metadata for {} vehicles", entries.len());
        Ok(entries.len())
    }

    /// Lookup counters so far
    #[must_use]
    pub fn counters(&self) -> MetadataCacheCounters {
        *self.counters.lock()
    }

    /// Metadata returned on miss or fault
    #[must_use]
    pub const fn fallback(&self) -> &VehicleMetadata {
        &self.fallback
    }
}
