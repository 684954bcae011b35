//! Wire types for the round API
//!
//! Row layouts come in two shapes: the public one (bomb withheld, served
//! while the round can still be played) and the revealed one. Conversions
//! from the engine's session types enforce that split in one place.

use serde::{Deserialize, Serialize};

use crate::fairness::verify::VerificationReport;
use crate::round::types::{GameSession, RoundSummary, RowPhase, RowRecord, SessionStatus};
use crate::round::SettlementReferences;
use crate::settlement::attestation::SignedAttestations;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRange {
    pub min: u16,
    pub max: u16,
}

/// POST /api/v1/rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRoundRequest {
    pub player_address: String,
    #[serde(default)]
    pub wager_amount: Option<u64>,
    pub tile_range: TileRange,
    #[serde(default)]
    pub locked_tile_counts: Vec<u16>,
    #[serde(default)]
    pub client_seed: Option<String>,
}

/// One row as exposed while the round is live: bomb position withheld.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowLayout {
    pub row_index: u32,
    pub nonce: u64,
    pub tile_count: u16,
    pub multiplier: f64,
    pub hash: String,
    pub probabilities: Vec<f64>,
    pub phase: RowPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_column: Option<u16>,
}

impl RowLayout {
    fn from_record(record: &RowRecord) -> Self {
        Self {
            row_index: record.plan.row_index,
            nonce: record.plan.nonce,
            tile_count: record.plan.tile_count,
            multiplier: record.plan.row_multiplier,
            hash: record.plan.game_hash.clone(),
            probabilities: record.plan.probabilities.clone(),
            phase: record.phase,
            picked_column: record.picked_column,
        }
    }
}

/// One row in a reveal response, bomb position included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRevealed {
    #[serde(flatten)]
    pub layout: RowLayout,
    pub bomb_index: u16,
}

impl RowRevealed {
    fn from_record(record: &RowRecord) -> Self {
        Self {
            layout: RowLayout::from_record(record),
            bomb_index: record.plan.bomb_index,
        }
    }
}

/// Session snapshot served to the player: seeds and bombs withheld.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    pub commitment_hash: String,
    pub client_seed: String,
    pub nonce_base: u64,
    pub current_row: u32,
    pub current_multiplier: f64,
    pub completed_rows: u32,
    pub wager_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wager_amount: Option<u64>,
    pub rows: Vec<RowLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_summary: Option<RoundSummary>,
}

impl SessionView {
    pub fn from_session(session: &GameSession) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            commitment_hash: session.server_seed_hash.clone(),
            client_seed: session.client_seed.clone(),
            nonce_base: session.nonce_base,
            current_row: session.current_row,
            current_multiplier: session.current_multiplier,
            completed_rows: session.completed_rows,
            wager_registered: session.wager_registered,
            wager_amount: session.wager_amount,
            rows: session.rows.iter().map(RowLayout::from_record).collect(),
            round_summary: session.round_summary.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub session: SessionView,
}

impl SessionResponse {
    pub fn from_session(session: &GameSession) -> Self {
        Self {
            success: true,
            session: SessionView::from_session(session),
        }
    }
}

/// Allowed row actions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RowAction {
    SelectTile,
    RegisterWager,
    CashOut,
}

/// POST /api/v1/rounds/:id/action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowActionRequest {
    pub player_address: String,
    pub action: RowAction,
    #[serde(default)]
    pub row_index: Option<u32>,
    #[serde(default)]
    pub column: Option<u16>,
    #[serde(default)]
    pub wager_amount: Option<u64>,
    #[serde(default)]
    pub tx_reference: Option<String>,
}

/// POST /api/v1/rounds/:id/reveal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResponse {
    pub success: bool,
    pub session_id: String,
    pub status: SessionStatus,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce_base: u64,
    pub rows: Vec<RowRevealed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_summary: Option<RoundSummary>,
}

impl RevealResponse {
    pub fn from_session(session: &GameSession) -> Self {
        Self {
            success: true,
            session_id: session.id.clone(),
            status: session.status,
            server_seed: session.server_seed.clone(),
            server_seed_hash: session.server_seed_hash.clone(),
            client_seed: session.client_seed.clone(),
            nonce_base: session.nonce_base,
            rows: session.rows.iter().map(RowRevealed::from_record).collect(),
            round_summary: session.round_summary.clone(),
        }
    }
}

/// POST /api/v1/rounds/:id/settle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub player_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    pub session_id: String,
    pub status: SessionStatus,
    pub attestations: SignedAttestations,
    pub settlement: SettlementReferences,
}

/// POST /api/v1/verify
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    #[serde(default)]
    pub nonce_base: u64,
    #[serde(default = "default_bombs_per_row")]
    pub bombs_per_row: u16,
    pub rows: Vec<ClaimedRowDto>,
}

fn default_bombs_per_row() -> u16 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedRowDto {
    pub tile_count: u16,
    pub claimed_bomb_index: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: VerificationReport,
}

/// GET /api/v1/rounds/:id/record: the persisted record, seeds included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub success: bool,
    pub session: GameSession,
}

/// POST /api/v1/rounds/restore
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub player_address: String,
}

/// GET /api/v1/players/:address/recent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSessionsResponse {
    pub success: bool,
    pub sessions: Vec<GameSession>,
}

/// POST /api/v1/maintenance/prune
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    pub success: bool,
    pub pruned: usize,
}

/// GET /api/v1/stats
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub metrics: crate::metrics::MetricsSnapshot,
    pub fallback_mode: bool,
    pub live_sessions: usize,
    pub signer_public_key: String,
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}
