//! Configuration management with validation and defaults
//!
//! Centralized configuration for the round engine, store, chain access and
//! attestation issuance

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerlineConfig {
    pub game: GameConfig,
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub attestation: AttestationConfig,
}

impl Default for TowerlineConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            store: StoreConfig::default(),
            chain: ChainConfig::default(),
            attestation: AttestationConfig::default(),
        }
    }
}

/// Round generation and payout parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Game identifier baked into session keys and attestations
    pub game_id: u64,
    pub bombs_per_row: u16,
    /// Fraction withheld from fair odds, in [0, 1)
    pub house_edge: f64,
    /// Cumulative multiplier ceiling; rows past it are truncated
    pub multiplier_cap: f64,
    pub default_row_count: u32,
    pub max_generated_rows: u32,
    /// Extra rows added on top of the cap estimate
    pub safety_margin: u32,
    /// Global bounds any requested tile range must fall inside
    pub min_tile_count: u16,
    pub max_tile_count: u16,
    pub xp_base: u64,
    pub xp_per_row: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            game_id: 3,
            bombs_per_row: 1,
            house_edge: 0.05,
            multiplier_cap: 1000.0,
            default_row_count: 9,
            max_generated_rows: 64,
            safety_margin: 2,
            min_tile_count: 2,
            max_tile_count: 16,
            xp_base: 10,
            xp_per_row: 25,
        }
    }
}

/// Session store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_directory: String,
    /// When false the store runs on the in-process backend only
    pub durable_enabled: bool,
    /// Absolute session lifetime from creation
    pub max_lifetime_secs: u64,
    /// Idle-abandonment window from the last mutation
    pub idle_window_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/towerline".to_string(),
            durable_enabled: true,
            max_lifetime_secs: 86_400,
            idle_window_secs: 900,
            prune_interval_secs: 60,
        }
    }
}

/// Outbound chain call bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub call_timeout_ms: u64,
    /// Longer bound for waiting out a transaction confirmation
    pub receipt_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            receipt_timeout_ms: 30_000,
        }
    }
}

/// Attestation issuance configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Seconds an issued attestation stays redeemable
    pub validity_window_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            validity_window_secs: 600,
        }
    }
}

/// Configuration validation and factory methods
impl TowerlineConfig {
    /// Production deployment defaults with durable persistence
    pub fn production() -> Self {
        Self {
            store: StoreConfig {
                data_directory: "./DB/towerline".to_string(),
                durable_enabled: true,
                max_lifetime_secs: 86_400,
                idle_window_secs: 900,
                prune_interval_secs: 60,
            },
            ..Default::default()
        }
    }

    /// Short expiry windows and memory-only storage for exercising pruning
    /// and restart flows in tests
    pub fn smoke_test() -> Self {
        Self {
            store: StoreConfig {
                data_directory: "./DB/towerline_test".to_string(),
                durable_enabled: false,
                max_lifetime_secs: 2,
                idle_window_secs: 1,
                prune_interval_secs: 1,
            },
            chain: ChainConfig {
                call_timeout_ms: 500,
                receipt_timeout_ms: 1_000,
            },
            ..Default::default()
        }
    }

    /// Load a TOML configuration file; missing sections fall back to defaults.
    pub fn load(path: &str) -> Result<Self, ConfigValidationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigValidationError::LoadFailed(format!("{}: {}", path, e)))?;
        toml::from_str(&raw)
            .map_err(|e| ConfigValidationError::LoadFailed(format!("{}: {}", path, e)))
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.game.bombs_per_row == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "bombs_per_row must be > 0".to_string(),
            ));
        }

        if self.game.min_tile_count <= self.game.bombs_per_row {
            return Err(ConfigValidationError::LogicalInconsistency(
                "min_tile_count must exceed bombs_per_row or no safe tile exists".to_string(),
            ));
        }

        if self.game.max_tile_count < self.game.min_tile_count {
            return Err(ConfigValidationError::InvalidValue(
                "max_tile_count must be >= min_tile_count".to_string(),
            ));
        }

        if self.game.max_tile_count > crate::fairness::rows::MAX_TILE_COUNT {
            return Err(ConfigValidationError::InvalidValue(format!(
                "max_tile_count must be <= {}, the sampler draws one byte per tile pick",
                crate::fairness::rows::MAX_TILE_COUNT
            )));
        }

        if !(0.0..1.0).contains(&self.game.house_edge) {
            return Err(ConfigValidationError::InvalidValue(
                "house_edge must be in [0, 1)".to_string(),
            ));
        }

        if self.game.multiplier_cap <= 1.0 {
            return Err(ConfigValidationError::InvalidValue(
                "multiplier_cap must be > 1".to_string(),
            ));
        }

        // The widest row carries the smallest per-row multiplier; it still has
        // to pay out more than it costs or row sizing cannot converge.
        let widest = self.game.max_tile_count as f64;
        let worst_multiplier = widest / (widest - self.game.bombs_per_row as f64)
            * (1.0 - self.game.house_edge);
        if worst_multiplier <= 1.0 {
            return Err(ConfigValidationError::LogicalInconsistency(
                "house_edge leaves the widest row with a multiplier <= 1".to_string(),
            ));
        }

        if self.game.default_row_count == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "default_row_count must be > 0".to_string(),
            ));
        }

        if self.game.max_generated_rows < self.game.default_row_count {
            return Err(ConfigValidationError::LogicalInconsistency(
                "max_generated_rows must be >= default_row_count".to_string(),
            ));
        }

        if self.store.durable_enabled && self.store.data_directory.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "store.data_directory".to_string(),
            ));
        }

        if self.store.idle_window_secs == 0 || self.store.max_lifetime_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "expiry windows must be > 0".to_string(),
            ));
        }

        if self.store.idle_window_secs > self.store.max_lifetime_secs {
            return Err(ConfigValidationError::LogicalInconsistency(
                "idle_window_secs must not exceed max_lifetime_secs".to_string(),
            ));
        }

        if self.store.prune_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "prune_interval_secs must be > 0".to_string(),
            ));
        }

        if self.chain.call_timeout_ms == 0 || self.chain.receipt_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "chain timeouts must be > 0".to_string(),
            ));
        }

        if self.attestation.validity_window_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "validity_window_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Convert to duration types for internal use
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.store.max_lifetime_secs)
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.store.idle_window_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.store.prune_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.chain.call_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.chain.receipt_timeout_ms)
    }

    pub fn attestation_validity(&self) -> Duration {
        Duration::from_secs(self.attestation.validity_window_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidValue(String),
    LogicalInconsistency(String),
    MissingRequired(String),
    LoadFailed(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => {
                write!(f, "Invalid configuration value: {}", msg)
            }
            ConfigValidationError::LogicalInconsistency(msg) => {
                write!(f, "Configuration logical inconsistency: {}", msg)
            }
            ConfigValidationError::MissingRequired(msg) => {
                write!(f, "Missing required configuration: {}", msg)
            }
            ConfigValidationError::LoadFailed(msg) => {
                write!(f, "Failed to load configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}
