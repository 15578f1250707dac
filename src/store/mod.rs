//! Remote entity store: the authoritative tier when reachable.
//!
//! A collection of state documents keyed by id, plus one advisory metadata
//! document holding the time of the last global refresh.

mod memory;
mod nats;

pub use memory::MemoryEntityStore;
pub use nats::NatsEntityStore;

use crate::state::StateRecord;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Advisory record of the last time any state was persisted remotely
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMetadata {
    /// Epoch millis
    pub last_updated: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity or listing failure; triggers the local cache fallback
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to write state {id}: {message}")]
    Write { id: String, message: String },

    /// Best-effort batch write where some documents failed
    #[error("{} of {attempted} state writes failed: {}", .failed.len(), .failed.join(", "))]
    PartialWrite { attempted: usize, failed: Vec<String> },
}

/// Storage contract for the remote tier.
///
/// `list_all` must distinguish "unreachable" (`StoreError::Unavailable`)
/// from "reachable but empty" (`Ok(vec![])`); only the latter triggers
/// bootstrap.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<StateRecord>, StoreError>;

    async fn upsert(&self, record: &StateRecord) -> Result<(), StoreError>;

    /// Write every record, best-effort per document.
    ///
    /// All writes are attempted even if some fail; failures are reported
    /// together as `PartialWrite`.
    async fn upsert_many(&self, records: &[StateRecord]) -> Result<(), StoreError> {
        let results = join_all(records.iter().map(|record| self.upsert(record))).await;

        let failed: Vec<String> = records
            .iter()
            .zip(results)
            .filter(|(_, result)| result.is_err())
            .map(|(record, _)| record.id.clone())
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::PartialWrite {
                attempted: records.len(),
                failed,
            })
        }
    }

    async fn read_metadata(&self) -> Result<Option<RefreshMetadata>, StoreError>;

    async fn write_metadata(&self, metadata: &RefreshMetadata) -> Result<(), StoreError>;
}

/// Which remote store implementation to run against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    #[default]
    Nats,
    /// Process-local store, for development without a NATS server
    Memory,
}

/// Remote tier configuration
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub backend: RemoteBackend,
    #[serde(default = "default_url")]
    pub url: String,
    /// Key-value bucket holding one document per state
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Key-value bucket holding the advisory refresh metadata
    #[serde(default = "default_metadata_bucket")]
    pub metadata_bucket: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_bucket() -> String {
    "statecraft_states".to_string()
}

fn default_metadata_bucket() -> String {
    "statecraft_metadata".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::default(),
            url: default_url(),
            bucket: default_bucket(),
            metadata_bucket: default_metadata_bucket(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Build the configured remote store.
pub fn build_store(config: &RemoteConfig) -> Arc<dyn EntityStore> {
    match config.backend {
        RemoteBackend::Nats => Arc::new(NatsEntityStore::new(config.clone())),
        RemoteBackend::Memory => Arc::new(MemoryEntityStore::new()),
    }
}
