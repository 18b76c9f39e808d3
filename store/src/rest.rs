use crate::cache::{LatestStateCache, PutOutcome};
use crate::clock::ReceiveClock;
use crate::metrics::{CHANNEL_FULL_TOTAL, RECORDS_TOTAL, REJECTED_TOTAL, STALE_RECORDS_TOTAL};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use telemetry::{DecodeError, StoredRecord, TelemetryRecord};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct AppState {
    cache: Arc<LatestStateCache>,
    log: Option<mpsc::Sender<StoredRecord>>,
    clock: Arc<ReceiveClock>,
}

impl AppState {
    pub fn new(cache: Arc<LatestStateCache>, log: Option<mpsc::Sender<StoredRecord>>) -> Self {
        Self {
            cache,
            log,
            clock: Arc::new(ReceiveClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<ReceiveClock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub applied: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DroneListResponse {
    pub data: Vec<StoredRecord>,
    pub total: usize,
    pub limit: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/data", post(post_data))
        .route("/api/drones", get(list_drones))
        .route("/api/drones/:id/status", get(drone_status))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Sink endpoint: validates with the same codec the gateway uses, stamps the
/// record and offers it to the cache. Stale records are still accepted and
/// appended to the log; only the cache ignores them.
async fn post_data(State(state): State<AppState>, body: Bytes) -> Result<Json<IngestResponse>, ApiError> {
    let record = telemetry::decode(&body).map_err(|e| {
        REJECTED_TOTAL.inc();
        warn!("Rejected telemetry: {}", e);
        ApiError::BadRequest(e)
    })?;

    let stored = StoredRecord::new(record, state.clock.now());
    RECORDS_TOTAL.inc();

    let outcome = state.cache.put(stored.clone());
    if outcome == PutOutcome::Stale {
        STALE_RECORDS_TOTAL.inc();
        debug!("Stale record for drone {} ignored by cache", stored.emitter_id());
    }

    if let Some(tx) = &state.log {
        append(tx, stored).await?;
    }

    Ok(Json(IngestResponse {
        status: "success".to_string(),
        applied: outcome != PutOutcome::Stale,
    }))
}

async fn append(tx: &mpsc::Sender<StoredRecord>, stored: StoredRecord) -> Result<(), ApiError> {
    match tx.try_send(stored) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(stored)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Append log channel full, waiting");
            tx.send(stored)
                .await
                .map_err(|_| ApiError::Internal(anyhow::anyhow!("append log is closed")))
        }
        Err(TrySendError::Closed(_)) => {
            error!("Append log channel closed, record not persisted");
            Err(ApiError::Internal(anyhow::anyhow!("append log is closed")))
        }
    }
}

async fn drone_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TelemetryRecord>, ApiError> {
    state
        .cache
        .get(&id)
        .map(|stored| Json(stored.record))
        .ok_or_else(|| ApiError::NotFound(format!("drone {} not found", id)))
}

async fn list_drones(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Json<DroneListResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let data = state.cache.list_recent(limit);

    Json(DroneListResponse {
        total: data.len(),
        data,
        limit,
    })
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(DecodeError),
    NotFound(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(e) => {
                error!("API error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal server error: {}", e))
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
