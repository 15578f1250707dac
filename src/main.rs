use anyhow::{Context, Result};
use statecraft_sync::api::{create_states_router, StatesAppState};
use statecraft_sync::cache::LocalCache;
use statecraft_sync::config;
use statecraft_sync::enrichment::LlmEnricher;
use statecraft_sync::seed::SeedProvider;
use statecraft_sync::store::build_store;
use statecraft_sync::StateDataService;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statecraft_sync=info".into()),
        )
        .init();

    info!("StateCraft state sync starting...");

    let config = config::load_from_env()?;

    let seed = SeedProvider::load(&config.seed)?;
    if seed.is_empty() {
        warn!("Seed list is empty; bootstrap will not be able to populate an empty store");
    }

    if config.enrichment.enabled && config.enrichment.api_key.is_none() {
        warn!("No enrichment API key configured (STATECRAFT_LLM_API_KEY)");
    }

    let store = build_store(&config.remote);
    let enricher = Arc::new(LlmEnricher::new(&config.enrichment)?);
    let cache = LocalCache::new(config.cache.path.clone());

    info!(
        backend = ?config.remote.backend,
        cache = %config.cache.path.display(),
        seed_states = seed.len(),
        interval_hours = config.refresh.interval_hours,
        "Components initialized"
    );

    let service = Arc::new(StateDataService::new(
        store,
        cache,
        enricher,
        seed,
        config.sync_config(),
    ));

    // Warm the dataset so the first player request is served from fresh data
    let states = if config.refresh.force_on_start {
        service.refresh_all().await
    } else {
        service.get_entities().await
    };
    info!(states = states.len(), "Initial state sync complete");

    let app = create_states_router(Arc::new(StatesAppState {
        service: service.clone(),
    }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_addr))?;

    info!("Listening on {}", config.api.bind_addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
