use super::{EntityStore, RefreshMetadata, RemoteConfig, StoreError};
use crate::state::{Demographics, StateRecord, Stats};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Key of the metadata document inside the metadata bucket
const METADATA_KEY: &str = "states";

/// Timestamp field of a stored document.
///
/// This adapter writes RFC 3339 instants; documents written as plain epoch
/// millis are read as well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredTimestamp {
    Instant(DateTime<Utc>),
    Millis(i64),
}

impl StoredTimestamp {
    fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self::Instant)
    }

    fn millis(self) -> i64 {
        match self {
            Self::Instant(t) => t.timestamp_millis(),
            Self::Millis(millis) => millis,
        }
    }
}

/// State document as stored in the key-value bucket.
///
/// `None` (or a missing field) means the state has never been enriched.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    demographics: Demographics,
    initial_stats: Stats,
    #[serde(default)]
    political_climate: String,
    #[serde(default)]
    last_refreshed_at: Option<StoredTimestamp>,
}

impl From<&StateRecord> for StateDocument {
    fn from(record: &StateRecord) -> Self {
        let last_refreshed_at = if record.last_refreshed_at > 0 {
            StoredTimestamp::from_millis(record.last_refreshed_at)
        } else {
            None
        };

        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            demographics: record.demographics.clone(),
            initial_stats: record.initial_stats.clone(),
            political_climate: record.political_climate.clone(),
            last_refreshed_at,
        }
    }
}

impl From<StateDocument> for StateRecord {
    fn from(doc: StateDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            demographics: doc.demographics,
            initial_stats: doc.initial_stats,
            political_climate: doc.political_climate,
            last_refreshed_at: doc
                .last_refreshed_at
                .map(StoredTimestamp::millis)
                .unwrap_or(0)
                .max(0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    last_updated: StoredTimestamp,
}

struct Buckets {
    states: kv::Store,
    metadata: kv::Store,
}

/// Remote store on NATS JetStream key-value buckets.
///
/// One key per state id. The connection is established lazily on first use
/// and retried on every call until it succeeds, so the service can start
/// while NATS is down and serve from the local cache meanwhile.
pub struct NatsEntityStore {
    config: RemoteConfig,
    buckets: OnceCell<Buckets>,
}

impl NatsEntityStore {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            buckets: OnceCell::new(),
        }
    }

    async fn buckets(&self) -> Result<&Buckets, StoreError> {
        self.buckets
            .get_or_try_init(|| self.connect())
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    /// Connect to NATS and make sure both buckets exist
    async fn connect(&self) -> Result<Buckets> {
        info!("Connecting to NATS at {}", self.config.url);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client);

        let states = ensure_bucket(&jetstream, &self.config.bucket).await?;
        let metadata = ensure_bucket(&jetstream, &self.config.metadata_bucket).await?;

        Ok(Buckets { states, metadata })
    }
}

/// Get the key-value bucket, creating it if it does not exist yet
async fn ensure_bucket(jetstream: &jetstream::Context, bucket: &str) -> Result<kv::Store> {
    match jetstream.get_key_value(bucket).await {
        Ok(store) => return Ok(store),
        Err(_) => {
            info!("Bucket '{}' does not exist, creating...", bucket);
        }
    }

    let store = jetstream
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            ..Default::default()
        })
        .await
        .with_context(|| format!("Failed to create key-value bucket '{}'", bucket))?;

    info!("Created key-value bucket '{}'", bucket);
    Ok(store)
}

#[async_trait]
impl EntityStore for NatsEntityStore {
    async fn list_all(&self) -> Result<Vec<StateRecord>, StoreError> {
        let buckets = self.buckets().await?;

        let keys: Vec<String> = buckets
            .states
            .keys()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to list state keys: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read state keys: {}", e)))?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let payload = buckets.states.get(&key).await.map_err(|e| {
                StoreError::Unavailable(format!("Failed to read state '{}': {}", key, e))
            })?;

            // Deleted between listing and reading
            let Some(payload) = payload else {
                continue;
            };

            match serde_json::from_slice::<StateDocument>(&payload) {
                Ok(doc) => records.push(doc.into()),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed state document"),
            }
        }

        Ok(records)
    }

    async fn upsert(&self, record: &StateRecord) -> Result<(), StoreError> {
        let buckets = self.buckets().await?;
        let write_error = |message: String| StoreError::Write {
            id: record.id.clone(),
            message,
        };

        let payload = serde_json::to_vec(&StateDocument::from(record))
            .map_err(|e| write_error(e.to_string()))?;

        buckets
            .states
            .put(&record.id, payload.into())
            .await
            .map_err(|e| write_error(e.to_string()))?;

        Ok(())
    }

    async fn read_metadata(&self) -> Result<Option<RefreshMetadata>, StoreError> {
        let buckets = self.buckets().await?;

        let payload = buckets
            .metadata
            .get(METADATA_KEY)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to read metadata: {}", e)))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_slice::<MetadataDocument>(&payload) {
            Ok(doc) => Ok(Some(RefreshMetadata {
                last_updated: doc.last_updated.millis(),
            })),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed refresh metadata");
                Ok(None)
            }
        }
    }

    async fn write_metadata(&self, metadata: &RefreshMetadata) -> Result<(), StoreError> {
        let buckets = self.buckets().await?;
        let write_error = |message: String| StoreError::Write {
            id: METADATA_KEY.to_string(),
            message,
        };

        let last_updated = StoredTimestamp::from_millis(metadata.last_updated)
            .ok_or_else(|| write_error(format!("invalid timestamp {}", metadata.last_updated)))?;
        let payload = serde_json::to_vec(&MetadataDocument { last_updated })
            .map_err(|e| write_error(e.to_string()))?;

        buckets
            .metadata
            .put(METADATA_KEY, payload.into())
            .await
            .map_err(|e| write_error(e.to_string()))?;

        Ok(())
    }
}
