use crate::state::StateRecord;
use crate::sync::StateDataService;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for the states API
pub struct StatesAppState {
    pub service: Arc<StateDataService>,
}

/// Refresh status summary
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Advisory epoch millis of the last remote persist, if known
    pub last_updated: Option<i64>,
    pub refresh_interval_ms: u64,
    pub enrichment_enabled: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create states API router
pub fn create_states_router(state: Arc<StatesAppState>) -> Router {
    Router::new()
        .route("/api/states", get(list_states))
        .route("/api/states/refresh", post(refresh_states))
        .route("/api/states/status", get(status))
        .route("/api/states/:id", get(get_state))
        .with_state(state)
}

/// GET /api/states - Every state sorted by name, refreshing stale ones first
///
/// Always 200; an empty array means no data source was available.
async fn list_states(State(state): State<Arc<StatesAppState>>) -> Json<Vec<StateRecord>> {
    Json(state.service.get_entities().await)
}

/// POST /api/states/refresh - Re-enrich every state regardless of age
async fn refresh_states(State(state): State<Arc<StatesAppState>>) -> Json<Vec<StateRecord>> {
    Json(state.service.refresh_all().await)
}

/// GET /api/states/status - Advisory refresh metadata
async fn status(State(state): State<Arc<StatesAppState>>) -> Json<StatusResponse> {
    let config = state.service.config();

    let refresh_interval_ms =
        u64::try_from(config.refresh_interval.as_millis()).unwrap_or(u64::MAX);

    Json(StatusResponse {
        last_updated: state.service.last_global_refresh().await,
        refresh_interval_ms,
        enrichment_enabled: config.enable_enrichment,
    })
}

/// GET /api/states/:id - Get specific state from the last persisted snapshot
async fn get_state(
    State(state): State<Arc<StatesAppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateRecord>, StatesError> {
    state
        .service
        .get_entity(&id)
        .await
        .map(Json)
        .ok_or(StatesError::NotFound)
}

/// States API error types
#[derive(Debug)]
enum StatesError {
    NotFound,
}

impl IntoResponse for StatesError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            StatesError::NotFound => (StatusCode::NOT_FOUND, "State not found"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
        });

        (status, body).into_response()
    }
}
