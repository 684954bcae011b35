//! Route definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check (no auth, no versioned prefix)
        .route("/health", get(health_handler))
        // Round lifecycle
        .route("/api/v1/rounds", post(start_round_handler))
        .route("/api/v1/rounds/restore", post(restore_handler))
        .route("/api/v1/rounds/:id/action", post(row_action_handler))
        .route("/api/v1/rounds/:id/reveal", post(reveal_handler))
        .route("/api/v1/rounds/:id/settle", post(settle_handler))
        .route("/api/v1/rounds/:id/record", get(session_record_handler))
        // Fairness verification (pure)
        .route("/api/v1/verify", post(verify_handler))
        // Player history
        .route("/api/v1/players/:address/recent", get(recent_sessions_handler))
        // Maintenance and introspection
        .route("/api/v1/maintenance/prune", post(prune_handler))
        .route("/api/v1/stats", get(stats_handler))
        // Attach shared state
        .with_state(state)
}
