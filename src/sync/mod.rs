//! Staleness detection and refresh orchestration.
//!
//! `StateDataService::get_entities` is the single entry point the game uses
//! to obtain the state list. Tier order is fixed:
//!
//! 1. remote store (authoritative), refreshing stale or incomplete states
//! 2. bootstrap from seed shells when the remote store is empty
//! 3. local cache snapshot when the remote store is unreachable
//! 4. empty list
//!
//! No error ever escapes to the caller; failures are logged and degrade to
//! the next tier.

mod batch;
mod bootstrap;
mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use crate::cache::{CacheSnapshot, LocalCache};
use crate::enrichment::Enricher;
use crate::seed::SeedProvider;
use crate::state::{dedupe_by_id, sort_by_name, StateRecord};
use crate::store::{EntityStore, RefreshMetadata, StoreError};
use batch::EnrichmentBatch;
use bootstrap::bootstrap_states;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Orchestrator settings, fixed at construction
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// States older than this are re-enriched
    pub refresh_interval: Duration,
    /// When false, no enrichment calls are made
    pub enable_enrichment: bool,
    /// Bound on a single state's enrichment call
    pub enrichment_timeout: Duration,
    pub max_concurrent_enrichments: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(2 * 24 * 60 * 60),
            enable_enrichment: true,
            enrichment_timeout: Duration::from_secs(30),
            max_concurrent_enrichments: 32,
        }
    }
}

/// Failures that abort the remote path of one call
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// No seed shells: the service has no data source at all
    #[error("seed list is empty, no state data source is configured")]
    EmptySeed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshMode {
    /// Only stale or incomplete states
    Stale,
    /// Every state, regardless of age
    All,
}

/// Keeps the state dataset fresh across the remote, cache and seed tiers
pub struct StateDataService {
    store: Arc<dyn EntityStore>,
    cache: LocalCache,
    enricher: Arc<dyn Enricher>,
    seed: SeedProvider,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    /// Serializes overlapping orchestrations within this process
    single_flight: Mutex<()>,
}

impl StateDataService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: LocalCache,
        enricher: Arc<dyn Enricher>,
        seed: SeedProvider,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            cache,
            enricher,
            seed,
            clock: Arc::new(SystemClock),
            config,
            single_flight: Mutex::new(()),
        }
    }

    /// Replace the wall clock (tests drive staleness through this).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Return every state, sorted by name, refreshing stale ones first.
    ///
    /// Never fails: the degenerate result is an empty list.
    pub async fn get_entities(&self) -> Vec<StateRecord> {
        self.run(RefreshMode::Stale).await
    }

    /// Re-enrich every state regardless of age, then return the list.
    pub async fn refresh_all(&self) -> Vec<StateRecord> {
        self.run(RefreshMode::All).await
    }

    /// Look up one state without starting a refresh batch.
    ///
    /// Served from the local snapshot, which mirrors the last returned set.
    /// Only when no snapshot exists yet does this run a full `get_entities`.
    pub async fn get_entity(&self, id: &str) -> Option<StateRecord> {
        match self.cache.read_snapshot().await {
            Ok(Some(snapshot)) => {
                return dedupe_by_id(snapshot.states)
                    .into_iter()
                    .find(|s| s.id == id);
            }
            Ok(None) => debug!("No local snapshot yet, syncing for lookup"),
            Err(e) => warn!(error = %e, "Local cache unusable, syncing for lookup"),
        }

        self.get_entities().await.into_iter().find(|s| s.id == id)
    }

    /// Advisory time of the last remote persist, if the store has one.
    pub async fn last_global_refresh(&self) -> Option<i64> {
        match self.store.read_metadata().await {
            Ok(metadata) => metadata.map(|m| m.last_updated),
            Err(e) => {
                warn!(error = %e, "Failed to read refresh metadata");
                None
            }
        }
    }

    async fn run(&self, mode: RefreshMode) -> Vec<StateRecord> {
        let _guard = self.single_flight.lock().await;
        let started_at = self.clock.now_millis();

        match self.sync(mode, started_at).await {
            Ok(states) => states,
            Err(SyncError::StoreUnavailable(e)) => {
                warn!(error = %e, "Remote store unavailable, falling back to local cache");
                self.load_cached_states().await
            }
            Err(SyncError::EmptySeed) => {
                error!(
                    "Configuration error: remote store is empty and the seed list is empty; \
                     no state data is available"
                );
                Vec::new()
            }
        }
    }

    async fn sync(&self, mode: RefreshMode, now: i64) -> Result<Vec<StateRecord>, SyncError> {
        let remote = self.store.list_all().await?;
        let batch = self.batch();

        if remote.is_empty() {
            info!("Remote store is empty, bootstrapping");
            let mut states = bootstrap_states(&self.seed, batch.as_ref(), now).await?;
            sort_by_name(&mut states);
            self.persist(&states, &states).await;
            return Ok(states);
        }

        let mut states = dedupe_by_id(remote);

        let targets: Vec<(usize, String)> = states
            .iter()
            .enumerate()
            .filter(|(_, state)| {
                mode == RefreshMode::All
                    || state.needs_refresh(now, self.refresh_interval_ms())
            })
            .map(|(idx, state)| (idx, state.name.clone()))
            .collect();

        let mut changed = Vec::new();

        match (&batch, targets.is_empty()) {
            (_, true) => debug!(states = states.len(), "All states fresh"),
            (None, false) => {
                debug!(stale = targets.len(), "Enrichment disabled, serving stale states")
            }
            (Some(batch), false) => {
                info!(
                    stale = targets.len(),
                    total = states.len(),
                    "Refreshing stale states"
                );

                let mut failed = 0;
                for (idx, outcome) in batch.run(targets).await {
                    match outcome {
                        Ok(fields) => {
                            states[idx].apply_enrichment(fields, now);
                            changed.push(idx);
                        }
                        Err(_) => failed += 1,
                    }
                }

                info!(refreshed = changed.len(), failed, "Refresh batch complete");
            }
        }

        let changed: Vec<StateRecord> = changed.into_iter().map(|idx| states[idx].clone()).collect();

        sort_by_name(&mut states);
        self.persist(&states, &changed).await;

        Ok(states)
    }

    /// Write changed records remotely and the full set locally. Best-effort:
    /// failures are logged and never affect the in-memory result.
    async fn persist(&self, all: &[StateRecord], changed: &[StateRecord]) {
        if !changed.is_empty() {
            let remote_ok = match self.store.upsert_many(changed).await {
                Ok(()) => true,
                Err(StoreError::PartialWrite { attempted, failed }) => {
                    warn!(
                        attempted,
                        failed = %failed.join(", "),
                        "Some states failed to persist remotely"
                    );
                    failed.len() < attempted
                }
                Err(e) => {
                    warn!(error = %e, "Failed to persist states remotely");
                    false
                }
            };

            if remote_ok {
                let metadata = RefreshMetadata {
                    last_updated: self.clock.now_millis(),
                };
                if let Err(e) = self.store.write_metadata(&metadata).await {
                    warn!(error = %e, "Failed to write refresh metadata");
                }
            }
        }

        let snapshot = CacheSnapshot::new(self.clock.now_millis(), all.to_vec());
        if let Err(e) = self.cache.write_snapshot(&snapshot).await {
            warn!(error = %e, "Failed to write local cache");
        }
    }

    /// Fallback tier: the local cache snapshot, or nothing.
    async fn load_cached_states(&self) -> Vec<StateRecord> {
        match self.cache.read_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(
                    states = snapshot.state_count(),
                    cached_at = snapshot.timestamp,
                    "Serving states from local cache"
                );
                let mut states = dedupe_by_id(snapshot.states);
                sort_by_name(&mut states);
                states
            }
            Ok(None) => {
                warn!(path = %self.cache.path().display(), "No local cache, returning no states");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Local cache unusable, returning no states");
                Vec::new()
            }
        }
    }

    fn batch(&self) -> Option<EnrichmentBatch<'_>> {
        self.config.enable_enrichment.then(|| {
            EnrichmentBatch::new(
                self.enricher.as_ref(),
                self.config.enrichment_timeout,
                self.config.max_concurrent_enrichments,
            )
        })
    }

    fn refresh_interval_ms(&self) -> i64 {
        i64::try_from(self.config.refresh_interval.as_millis()).unwrap_or(i64::MAX)
    }
}
