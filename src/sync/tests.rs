use super::*;
use crate::enrichment::{EnrichedFields, EnrichmentError};
use crate::state::{Demographics, Stats, PLACEHOLDER_POLITICAL_CLIMATE};
use crate::store::MemoryEntityStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

const NOW: i64 = 1_760_000_000_000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const INTERVAL_MS: i64 = 2 * DAY_MS;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Enricher that succeeds except for configured names, recording every call
#[derive(Default)]
struct ScriptedEnricher {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: std::sync::Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedEnricher {
    fn new() -> Self {
        Self::default()
    }

    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn fresh_fields(name: &str) -> EnrichedFields {
    EnrichedFields {
        demographics: Demographics {
            population: 10_000_000 + name.len() as u64,
            gdp: 5.0e12,
            literacy_rate: 75.5,
            crime_rate: 210.0,
        },
        political_climate: format!("Fresh climate for {}", name),
    }
}

#[async_trait]
impl Enricher for ScriptedEnricher {
    async fn enrich(&self, state_name: &str) -> Result<EnrichedFields, EnrichmentError> {
        self.calls.lock().unwrap().push(state_name.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(state_name) {
            return Err(EnrichmentError::Request {
                state: state_name.to_string(),
                message: "upstream error".to_string(),
            });
        }

        Ok(fresh_fields(state_name))
    }
}

/// Memory store with switchable connectivity and write failures
#[derive(Default)]
struct FlakyStore {
    inner: MemoryEntityStore,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    list_calls: AtomicUsize,
}

impl FlakyStore {
    fn with_records(records: Vec<StateRecord>) -> Self {
        Self {
            inner: MemoryEntityStore::with_records(records),
            ..Self::default()
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn list_all(&self) -> Result<Vec<StateRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.list_all().await
    }

    async fn upsert(&self, record: &StateRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                id: record.id.clone(),
                message: "write rejected".to_string(),
            });
        }
        self.inner.upsert(record).await
    }

    async fn read_metadata(&self) -> Result<Option<RefreshMetadata>, StoreError> {
        self.inner.read_metadata().await
    }

    async fn write_metadata(&self, metadata: &RefreshMetadata) -> Result<(), StoreError> {
        self.inner.write_metadata(metadata).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    service: StateDataService,
    store: Arc<FlakyStore>,
    enricher: Arc<ScriptedEnricher>,
    clock: Arc<ManualClock>,
    cache: LocalCache,
    _temp_dir: TempDir,
}

impl Harness {
    fn new(remote: Vec<StateRecord>, seed: Vec<StateRecord>, enricher: ScriptedEnricher) -> Self {
        Self::with_config(remote, seed, enricher, test_config())
    }

    fn with_config(
        remote: Vec<StateRecord>,
        seed: Vec<StateRecord>,
        enricher: ScriptedEnricher,
        config: SyncConfig,
    ) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cache_path: PathBuf = temp_dir.path().join(".tmp").join("state-data-cache.json");
        let cache = LocalCache::new(&cache_path);

        let store = Arc::new(FlakyStore::with_records(remote));
        let enricher = Arc::new(enricher);
        let clock = Arc::new(ManualClock::new(NOW));

        let service = StateDataService::new(
            store.clone(),
            cache.clone(),
            enricher.clone(),
            SeedProvider::from_shells(seed),
            config,
        )
        .with_clock(clock.clone());

        Self {
            service,
            store,
            enricher,
            clock,
            cache,
            _temp_dir: temp_dir,
        }
    }

    async fn cached(&self) -> Option<CacheSnapshot> {
        self.cache.read_snapshot().await.unwrap()
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        refresh_interval: Duration::from_millis(INTERVAL_MS as u64),
        enable_enrichment: true,
        enrichment_timeout: Duration::from_secs(5),
        max_concurrent_enrichments: 8,
    }
}

fn record(id: &str, name: &str, population: u64, last_refreshed_at: i64) -> StateRecord {
    StateRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("About {}", name),
        demographics: Demographics {
            population,
            gdp: if population > 0 { 1.0e12 } else { 0.0 },
            literacy_rate: if population > 0 { 70.0 } else { 0.0 },
            crime_rate: if population > 0 { 300.0 } else { 0.0 },
        },
        initial_stats: Stats {
            budget: 50.0,
            public_opinion: 55.0,
            police_strength: 60.0,
            opposition_strength: 40.0,
            unemployment_rate: 12.5,
        },
        political_climate: if population > 0 {
            format!("Old climate for {}", name)
        } else {
            String::new()
        },
        last_refreshed_at,
    }
}

fn fresh(id: &str, name: &str) -> StateRecord {
    record(id, name, 5_000_000, NOW - 1_000)
}

fn stale(id: &str, name: &str) -> StateRecord {
    record(id, name, 5_000_000, NOW - INTERVAL_MS - 1)
}

fn shell(id: &str, name: &str) -> StateRecord {
    record(id, name, 0, 0)
}

fn names(states: &[StateRecord]) -> Vec<&str> {
    states.iter().map(|s| s.name.as_str()).collect()
}

fn assert_sorted(states: &[StateRecord]) {
    for pair in states.windows(2) {
        assert!(
            pair[0].name <= pair[1].name,
            "{} sorted after {}",
            pair[0].name,
            pair[1].name
        );
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fresh_store_is_idempotent() {
    let h = Harness::new(
        vec![fresh("kerala", "Kerala"), fresh("assam", "Assam"), fresh("goa", "Goa")],
        vec![],
        ScriptedEnricher::new(),
    );

    let first = h.service.get_entities().await;
    let second = h.service.get_entities().await;

    assert_eq!(h.enricher.call_count(), 0);
    assert_eq!(first, second);
    assert_eq!(names(&first), vec!["Assam", "Goa", "Kerala"]);
}

#[tokio::test]
async fn test_stale_state_is_refreshed_once() {
    let h = Harness::new(
        vec![stale("goa", "Goa"), fresh("assam", "Assam")],
        vec![],
        ScriptedEnricher::new(),
    );

    let states = h.service.get_entities().await;

    assert_eq!(h.enricher.calls(), vec!["Goa"]);

    let goa = states.iter().find(|s| s.id == "goa").unwrap();
    assert!(goa.last_refreshed_at >= NOW);
    assert_eq!(goa.political_climate, "Fresh climate for Goa");
    assert_eq!(goa.demographics, fresh_fields("Goa").demographics);

    // Remote copy updated too
    let remote_goa = h.store.inner.get("goa").unwrap();
    assert_eq!(remote_goa.last_refreshed_at, goa.last_refreshed_at);

    // Immediately after, nothing is stale
    h.service.get_entities().await;
    assert_eq!(h.enricher.call_count(), 1);
}

#[tokio::test]
async fn test_state_becomes_stale_as_clock_advances() {
    let h = Harness::new(vec![fresh("goa", "Goa")], vec![], ScriptedEnricher::new());

    h.service.get_entities().await;
    assert_eq!(h.enricher.call_count(), 0);

    h.clock.advance(Duration::from_millis(INTERVAL_MS as u64));
    h.service.get_entities().await;
    assert_eq!(h.enricher.call_count(), 1);

    let goa = h.store.inner.get("goa").unwrap();
    assert_eq!(goa.last_refreshed_at, NOW + INTERVAL_MS);
}

#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let before = vec![
        stale("bihar", "Bihar"),
        stale("goa", "Goa"),
        stale("kerala", "Kerala"),
        stale("punjab", "Punjab"),
    ];
    let h = Harness::new(before.clone(), vec![], ScriptedEnricher::failing(&["Kerala"]));

    let states = h.service.get_entities().await;

    assert_eq!(states.len(), 4);
    assert_eq!(h.enricher.call_count(), 4);

    let kerala_before = before.iter().find(|s| s.id == "kerala").unwrap();
    let kerala = states.iter().find(|s| s.id == "kerala").unwrap();
    assert_eq!(kerala, kerala_before);
    assert_eq!(h.store.inner.get("kerala").unwrap(), *kerala_before);

    for state in states.iter().filter(|s| s.id != "kerala") {
        assert_eq!(state.political_climate, format!("Fresh climate for {}", state.name));
        assert!(state.last_refreshed_at >= NOW);
    }
}

#[tokio::test]
async fn test_failed_state_is_retried_next_call() {
    let h = Harness::new(
        vec![stale("goa", "Goa"), fresh("assam", "Assam")],
        vec![],
        ScriptedEnricher::failing(&["Goa"]),
    );

    h.service.get_entities().await;
    h.service.get_entities().await;

    assert_eq!(h.enricher.calls(), vec!["Goa", "Goa"]);
}

#[tokio::test]
async fn test_bootstrap_keeps_failed_shells() {
    let seed = vec![
        shell("uttar-pradesh", "Uttar Pradesh"),
        shell("bihar", "Bihar"),
        shell("goa", "Goa"),
        shell("assam", "Assam"),
        shell("sikkim", "Sikkim"),
    ];
    let h = Harness::new(vec![], seed, ScriptedEnricher::failing(&["Bihar", "Sikkim"]));

    let states = h.service.get_entities().await;

    assert_eq!(states.len(), 5);
    assert_eq!(h.enricher.call_count(), 5);
    assert_sorted(&states);

    for state in &states {
        if state.name == "Bihar" || state.name == "Sikkim" {
            assert_eq!(state.demographics.population, 0);
            assert_eq!(state.political_climate, PLACEHOLDER_POLITICAL_CLIMATE);
            assert_eq!(state.last_refreshed_at, 0);
        } else {
            assert!(state.is_complete());
            assert!(state.last_refreshed_at >= NOW);
        }
    }

    // Persisted to both tiers
    assert_eq!(h.store.inner.len(), 5);
    let cached = h.cached().await.unwrap();
    assert_eq!(cached.state_count(), 5);
    assert_eq!(cached.states, states);
}

#[tokio::test]
async fn test_bootstrapped_failures_refresh_on_next_call() {
    let h = Harness::new(
        vec![],
        vec![shell("bihar", "Bihar"), shell("goa", "Goa")],
        ScriptedEnricher::failing(&["Bihar"]),
    );

    h.service.get_entities().await;
    h.service.get_entities().await;

    let mut calls = h.enricher.calls();
    calls.sort();
    assert_eq!(calls, vec!["Bihar", "Bihar", "Goa"]);
}

#[tokio::test]
async fn test_unreachable_remote_serves_cache() {
    let h = Harness::new(vec![], vec![shell("goa", "Goa")], ScriptedEnricher::new());
    h.store.unavailable.store(true, Ordering::SeqCst);

    let snapshot = CacheSnapshot::new(
        NOW - DAY_MS,
        vec![
            record("west-bengal", "West Bengal", 90_000_000, 0),
            stale("assam", "Assam"),
            shell("bihar", "Bihar"),
        ],
    );
    h.cache.write_snapshot(&snapshot).await.unwrap();

    let states = h.service.get_entities().await;

    assert_eq!(names(&states), vec!["Assam", "Bihar", "West Bengal"]);
    assert_eq!(h.enricher.call_count(), 0);

    let mut expected = snapshot.states.clone();
    crate::state::sort_by_name(&mut expected);
    assert_eq!(states, expected);
}

#[tokio::test]
async fn test_unreachable_remote_without_cache_returns_empty() {
    let h = Harness::new(vec![], vec![shell("goa", "Goa")], ScriptedEnricher::new());
    h.store.unavailable.store(true, Ordering::SeqCst);

    let states = h.service.get_entities().await;

    assert!(states.is_empty());
    assert_eq!(h.enricher.call_count(), 0);
}

#[tokio::test]
async fn test_unreachable_remote_with_corrupt_cache_returns_empty() {
    let h = Harness::new(vec![], vec![], ScriptedEnricher::new());
    h.store.unavailable.store(true, Ordering::SeqCst);

    std::fs::create_dir_all(h.cache.path().parent().unwrap()).unwrap();
    std::fs::write(h.cache.path(), b"{\"timestamp\": 1, \"states\": [").unwrap();

    let states = h.service.get_entities().await;
    assert!(states.is_empty());
}

#[tokio::test]
async fn test_builtin_seed_bootstrap_is_sorted() {
    let seed = SeedProvider::builtin().unwrap().shells();
    let h = Harness::new(vec![], seed, ScriptedEnricher::new());

    let states = h.service.get_entities().await;

    assert_eq!(states.len(), 28);
    assert_sorted(&states);
    assert_eq!(states.first().unwrap().name, "Andhra Pradesh");
    assert_eq!(states.last().unwrap().name, "West Bengal");
}

#[tokio::test]
async fn test_incomplete_state_example() {
    let h = Harness::new(
        vec![
            record("a", "Bihar", 0, 0),
            record("b", "Assam", 5_000_000, NOW - 1_000),
        ],
        vec![],
        ScriptedEnricher::new(),
    );
    let assam_before = h.store.inner.get("b").unwrap();

    let states = h.service.get_entities().await;

    assert_eq!(h.enricher.calls(), vec!["Bihar"]);
    assert_eq!(names(&states), vec!["Assam", "Bihar"]);
    assert_eq!(states[0], assam_before);
    assert_eq!(states[1].demographics, fresh_fields("Bihar").demographics);
    assert!(states[1].last_refreshed_at >= NOW);
}

// ---------------------------------------------------------------------------
// Failure modes and configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_seed_returns_empty() {
    let h = Harness::new(vec![], vec![], ScriptedEnricher::new());

    let states = h.service.get_entities().await;

    assert!(states.is_empty());
    assert!(h.store.inner.is_empty());
    assert!(h.cached().await.is_none());
}

#[tokio::test]
async fn test_remote_write_failure_still_returns_result() {
    let h = Harness::new(vec![stale("goa", "Goa")], vec![], ScriptedEnricher::new());
    h.store.fail_writes.store(true, Ordering::SeqCst);

    let states = h.service.get_entities().await;

    assert_eq!(states[0].political_climate, "Fresh climate for Goa");
    // Remote keeps the old copy, local cache mirrors the fresh result
    assert_eq!(h.store.inner.get("goa").unwrap(), stale("goa", "Goa"));
    assert_eq!(h.cached().await.unwrap().states, states);
    // No metadata when nothing reached the remote store
    assert!(h.service.last_global_refresh().await.is_none());
}

#[tokio::test]
async fn test_cache_write_failure_still_returns_result() {
    let temp_dir = TempDir::new().unwrap();
    // A regular file where the cache directory should be
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();

    let store = Arc::new(FlakyStore::with_records(vec![stale("goa", "Goa")]));
    let service = StateDataService::new(
        store.clone(),
        LocalCache::new(blocker.join("cache.json")),
        Arc::new(ScriptedEnricher::new()),
        SeedProvider::from_shells(vec![]),
        test_config(),
    )
    .with_clock(Arc::new(ManualClock::new(NOW)));

    let states = service.get_entities().await;

    assert_eq!(states.len(), 1);
    assert!(states[0].last_refreshed_at >= NOW);
    assert_eq!(store.inner.get("goa").unwrap(), states[0]);
}

#[tokio::test]
async fn test_metadata_written_after_persist() {
    let h = Harness::new(vec![stale("goa", "Goa")], vec![], ScriptedEnricher::new());
    assert!(h.service.last_global_refresh().await.is_none());

    h.service.get_entities().await;

    assert_eq!(h.service.last_global_refresh().await, Some(NOW));
}

#[tokio::test]
async fn test_fresh_call_mirrors_remote_into_cache() {
    let h = Harness::new(vec![fresh("goa", "Goa")], vec![], ScriptedEnricher::new());

    let states = h.service.get_entities().await;

    let cached = h.cached().await.unwrap();
    assert_eq!(cached.timestamp, NOW);
    assert_eq!(cached.states, states);
}

#[tokio::test]
async fn test_disabled_enrichment_makes_no_calls() {
    let config = SyncConfig {
        enable_enrichment: false,
        ..test_config()
    };
    let h = Harness::with_config(
        vec![],
        vec![shell("goa", "Goa"), shell("assam", "Assam")],
        ScriptedEnricher::new(),
        config,
    );

    let states = h.service.get_entities().await;

    assert_eq!(h.enricher.call_count(), 0);
    assert_eq!(names(&states), vec!["Assam", "Goa"]);
    assert!(states
        .iter()
        .all(|s| s.political_climate == PLACEHOLDER_POLITICAL_CLIMATE));

    // Stale states are served unchanged as well
    let again = h.service.get_entities().await;
    assert_eq!(again, states);
    assert_eq!(h.enricher.call_count(), 0);
}

#[tokio::test]
async fn test_refresh_all_ignores_staleness() {
    let h = Harness::new(
        vec![fresh("goa", "Goa"), fresh("assam", "Assam")],
        vec![],
        ScriptedEnricher::new(),
    );

    let states = h.service.refresh_all().await;

    let mut calls = h.enricher.calls();
    calls.sort();
    assert_eq!(calls, vec!["Assam", "Goa"]);
    assert!(states.iter().all(|s| s.last_refreshed_at >= NOW));
}

#[tokio::test]
async fn test_hung_enrichment_times_out() {
    let config = SyncConfig {
        enrichment_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let h = Harness::with_config(
        vec![stale("goa", "Goa")],
        vec![],
        ScriptedEnricher::new().with_delay(Duration::from_secs(30)),
        config,
    );

    let states = h.service.get_entities().await;

    assert_eq!(states, vec![stale("goa", "Goa")]);
}

#[tokio::test]
async fn test_duplicate_remote_ids_enriched_once() {
    let mut older = stale("goa", "Goa");
    older.last_refreshed_at -= 5_000;

    let store = Arc::new(FlakyStore::default());
    let enricher = Arc::new(ScriptedEnricher::new());

    // Two documents for the same id, as a misbehaving store might return
    struct DuplicatingStore(Arc<FlakyStore>, StateRecord);

    #[async_trait]
    impl EntityStore for DuplicatingStore {
        async fn list_all(&self) -> Result<Vec<StateRecord>, StoreError> {
            let mut records = self.0.list_all().await?;
            records.push(self.1.clone());
            Ok(records)
        }
        async fn upsert(&self, record: &StateRecord) -> Result<(), StoreError> {
            self.0.upsert(record).await
        }
        async fn read_metadata(&self) -> Result<Option<RefreshMetadata>, StoreError> {
            self.0.read_metadata().await
        }
        async fn write_metadata(&self, metadata: &RefreshMetadata) -> Result<(), StoreError> {
            self.0.write_metadata(metadata).await
        }
    }

    store.upsert(&stale("goa", "Goa")).await.unwrap();
    let temp_dir = TempDir::new().unwrap();
    let service = StateDataService::new(
        Arc::new(DuplicatingStore(store.clone(), older)),
        LocalCache::new(temp_dir.path().join("cache.json")),
        enricher.clone(),
        SeedProvider::from_shells(vec![]),
        test_config(),
    )
    .with_clock(Arc::new(ManualClock::new(NOW)));

    let states = service.get_entities().await;

    assert_eq!(states.len(), 1);
    assert_eq!(enricher.calls(), vec!["Goa"]);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let config = SyncConfig {
        max_concurrent_enrichments: 2,
        ..test_config()
    };
    let h = Harness::with_config(
        vec![
            stale("a", "A"),
            stale("b", "B"),
            stale("c", "C"),
            stale("d", "D"),
            stale("e", "E"),
        ],
        vec![],
        ScriptedEnricher::new().with_delay(Duration::from_millis(20)),
        config,
    );

    let states = h.service.get_entities().await;

    assert_eq!(states.len(), 5);
    assert_eq!(h.enricher.call_count(), 5);
    assert_eq!(h.enricher.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_overlapping_calls_are_serialized() {
    let h = Harness::new(
        vec![stale("goa", "Goa")],
        vec![],
        ScriptedEnricher::new().with_delay(Duration::from_millis(50)),
    );

    let (first, second) = tokio::join!(h.service.get_entities(), h.service.get_entities());

    // The second call sees the first call's refresh and makes no new request
    assert_eq!(h.enricher.call_count(), 1);
    assert_eq!(first, second);
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 2);
}
