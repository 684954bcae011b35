//! Towerline API server binary
//!
//! Standalone deployment: durable RocksDB session store, in-process ledger as
//! the chain client, HTTP surface on top of the round engine.

use clap::Parser;
use std::sync::Arc;

use towerline::api::{ApiConfig, ApiServer};
use towerline::config::TowerlineConfig;
use towerline::metrics::EngineMetrics;
use towerline::round::RoundEngine;
use towerline::settlement::{AttestationSigner, InProcessLedger, SettlementIssuer};
use towerline::store::{RocksBackend, SessionBackend, SessionStore, StorePolicy};

#[derive(Parser, Debug)]
#[command(name = "towerline-api")]
#[command(about = "Towerline provably-fair round engine API", long_about = None)]
struct Args {
    /// API server host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// API server port
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Session database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long, default_value = "*")]
    cors_origins: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Optional TOML configuration file; flags override file values
    #[arg(long)]
    config: Option<String>,

    /// Run without the durable backend (in-process store only)
    #[arg(long)]
    memory_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TowerlineConfig::load(path)?,
        None => TowerlineConfig::default(),
    };
    if let Some(db_path) = &args.db_path {
        config.store.data_directory = db_path.clone();
    }
    if args.memory_only {
        config.store.durable_enabled = false;
    }
    config.validate()?;

    let durable: Option<Arc<dyn SessionBackend>> = if config.store.durable_enabled {
        println!("Opening session database: {}", config.store.data_directory);
        let backend = RocksBackend::open(&config.store.data_directory)?;
        println!("Session database opened");
        Some(Arc::new(backend))
    } else {
        println!("Running on the in-process session store only");
        None
    };

    // The signing identity must survive restarts once a durable backend
    // exists; memory-only deployments get a per-process key.
    let signer = match &durable {
        Some(backend) => AttestationSigner::load_or_create(backend.as_ref())?,
        None => AttestationSigner::generate(),
    };
    println!("Attestation signer: {}", signer.public_key_hex());

    let store = Arc::new(SessionStore::new(
        durable,
        StorePolicy::from_config(&config.store),
    ));
    let issuer = SettlementIssuer::new(Arc::new(InProcessLedger::new()), signer, &config);
    let metrics = Arc::new(EngineMetrics::new());
    let engine = Arc::new(RoundEngine::new(
        store,
        issuer,
        config.game.clone(),
        metrics.clone(),
    ));

    let allowed_origins: Vec<String> = args
        .cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let api_config = ApiConfig {
        host: args.host,
        port: args.port,
        allowed_origins,
        request_timeout_secs: args.timeout,
        prune_interval: config.prune_interval(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    ApiServer::new(api_config, engine, metrics).run().await
}
