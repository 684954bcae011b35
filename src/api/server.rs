//! API server
//!
//! Wires the round engine behind the HTTP surface and owns the background
//! pruning task for the engine's session store.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::metrics::EngineMetrics;
use crate::round::engine::RoundEngine;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub prune_interval: Duration,
    pub version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            prune_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct ApiServer {
    config: ApiConfig,
    engine: Arc<RoundEngine>,
    metrics: Arc<EngineMetrics>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: Arc<RoundEngine>, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            engine,
            metrics,
        }
    }

    /// Start the API server; returns when a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "towerline=info,tower_http=info".into()),
            )
            .init();

        info!("Starting Towerline round engine API");
        if self.engine.store().is_degraded() {
            warn!("session store started in fallback mode");
        }

        let app = self.create_app();
        let addr = self.socket_addr()?;
        self.log_server_info(&addr);

        // Background pruning runs independently of live mutations and only
        // ever deletes already-expired, non-terminal sessions.
        let prune_engine = self.engine.clone();
        let prune_interval = self.config.prune_interval;
        let pruner = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prune_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match prune_engine.prune_expired() {
                    Ok(0) => {}
                    Ok(pruned) => tracing::debug!(pruned, "background prune pass"),
                    Err(e) => warn!(error = %e, "background prune pass failed"),
                }
            }
        });

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        pruner.abort();
        info!("API server stopped gracefully");
        Ok(())
    }

    /// Create the application with the full middleware stack
    fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            metrics: self.metrics.clone(),
            version: self.config.version.clone(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            // Tracing layer (last for complete request tracing)
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self, addr: &SocketAddr) {
        info!("Server configuration:");
        info!("   Listen: http://{}", addr);
        info!("   Version: {}", self.config.version);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   Prune interval: {:?}", self.config.prune_interval);
        info!("   Signer public key: {}", self.engine.signer_public_key());
        info!("Available endpoints:");
        info!("   GET  /health                          - Health check");
        info!("   POST /api/v1/rounds                   - Start a round");
        info!("   POST /api/v1/rounds/restore           - Recover latest live session");
        info!("   POST /api/v1/rounds/:id/action        - selectTile / registerWager / cashOut");
        info!("   POST /api/v1/rounds/:id/reveal        - Disclose server seed");
        info!("   POST /api/v1/rounds/:id/settle        - Issue settlement attestations");
        info!("   GET  /api/v1/rounds/:id/record        - Audit record read");
        info!("   POST /api/v1/verify                   - Independent fairness check");
        info!("   GET  /api/v1/players/:address/recent  - Archived session history");
        info!("   POST /api/v1/maintenance/prune        - Prune expired sessions");
        info!("   GET  /api/v1/stats                    - Engine counters");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
