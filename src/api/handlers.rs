//! Request handlers
//!
//! Thin translation layer: decode the wire shape, call the engine, encode the
//! response. All game rules live in the engine; handlers only decide which
//! fields a caller is allowed to see.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::errors::ApiError;
use super::middleware::RequestId;
use super::models::*;
use crate::errors::ValidationError;
use crate::fairness::verify::{verify_round, ClaimedRow};
use crate::metrics::EngineMetrics;
use crate::round::engine::{RoundEngine, RoundRequest};

/// Shared application state
pub struct AppState {
    pub engine: Arc<RoundEngine>,
    pub metrics: Arc<EngineMetrics>,
    pub version: String,
}

fn reject(request_id: &RequestId, err: crate::errors::EngineError) -> ApiError {
    ApiError::new(request_id.0.clone(), err)
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        service: "towerline".to_string(),
        version: state.version.clone(),
        uptime_secs: state.metrics.total_runtime().as_secs(),
    })
}

/// POST /api/v1/rounds
pub async fn start_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRoundRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let round_req = RoundRequest {
        player_address: req.player_address,
        wager_amount: req.wager_amount,
        tile_min: req.tile_range.min,
        tile_max: req.tile_range.max,
        locked_tile_counts: req.locked_tile_counts,
        client_seed: req.client_seed,
    };

    let session = state
        .engine
        .start_round(&round_req)
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(SessionResponse::from_session(&session)))
}

/// POST /api/v1/rounds/:id/action
pub async fn row_action_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<RowActionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = match req.action {
        RowAction::SelectTile => {
            let row_index = req
                .row_index
                .ok_or_else(|| reject(&request_id, ValidationError::MissingField("rowIndex").into()))?;
            let column = req
                .column
                .ok_or_else(|| reject(&request_id, ValidationError::MissingField("column").into()))?;
            state
                .engine
                .select_tile(&session_id, &req.player_address, row_index, column)
                .map_err(|e| reject(&request_id, e))?
        }
        RowAction::RegisterWager => {
            let amount = req.wager_amount.ok_or_else(|| {
                reject(&request_id, ValidationError::MissingField("wagerAmount").into())
            })?;
            state
                .engine
                .register_wager(
                    &session_id,
                    &req.player_address,
                    amount,
                    req.tx_reference.as_deref(),
                )
                .await
                .map_err(|e| reject(&request_id, e))?
        }
        RowAction::CashOut => state
            .engine
            .cash_out(&session_id, &req.player_address)
            .map_err(|e| reject(&request_id, e))?,
    };

    Ok(Json(SessionResponse::from_session(&session)))
}

/// POST /api/v1/rounds/:id/reveal
pub async fn reveal_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<RevealResponse>, ApiError> {
    let session = state
        .engine
        .reveal(&session_id)
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(RevealResponse::from_session(&session)))
}

/// POST /api/v1/rounds/:id/settle
pub async fn settle_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<SettleResponse>, ApiError> {
    let (session, attestations) = state
        .engine
        .settle(&session_id, &req.player_address)
        .await
        .map_err(|e| reject(&request_id, e))?;

    let settlement = session.settlement.clone().ok_or_else(|| {
        reject(&request_id, crate::errors::ConflictError::SummaryMissing.into())
    })?;

    Ok(Json(SettleResponse {
        success: true,
        session_id: session.id,
        status: session.status,
        attestations,
        settlement,
    }))
}

/// POST /api/v1/verify (pure, touches no stored state).
pub async fn verify_handler(
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let claimed: Vec<ClaimedRow> = req
        .rows
        .iter()
        .map(|r| ClaimedRow {
            tile_count: r.tile_count,
            claimed_bomb_index: r.claimed_bomb_index,
        })
        .collect();

    let report = verify_round(
        &req.server_seed,
        &req.server_seed_hash,
        &req.client_seed,
        req.nonce_base,
        req.bombs_per_row,
        &claimed,
    )
    .map_err(|e| reject(&request_id, e))?;

    Ok(Json(VerifyResponse {
        success: true,
        report,
    }))
}

/// GET /api/v1/rounds/:id/record
pub async fn session_record_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<RecordResponse>, ApiError> {
    let session = state
        .engine
        .session_record(&session_id)
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(RecordResponse {
        success: true,
        session,
    }))
}

/// POST /api/v1/rounds/restore
pub async fn restore_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .engine
        .restore_session(&req.player_address)
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(SessionResponse::from_session(&session)))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

/// GET /api/v1/players/:address/recent
pub async fn recent_sessions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentSessionsResponse>, ApiError> {
    let sessions = state
        .engine
        .recent_sessions(&address, query.limit.min(100))
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(RecentSessionsResponse {
        success: true,
        sessions,
    }))
}

/// POST /api/v1/maintenance/prune
pub async fn prune_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<PruneResponse>, ApiError> {
    let pruned = state
        .engine
        .prune_expired()
        .map_err(|e| reject(&request_id, e))?;
    Ok(Json(PruneResponse {
        success: true,
        pruned,
    }))
}

/// GET /api/v1/stats
pub async fn stats_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let live_sessions = state
        .engine
        .store()
        .count_live()
        .map_err(|e| reject(&request_id, e))?;

    Ok(Json(StatsResponse {
        success: true,
        metrics: state.metrics.snapshot(),
        fallback_mode: state.engine.store().is_degraded(),
        live_sessions,
        signer_public_key: state.engine.signer_public_key(),
    }))
}
