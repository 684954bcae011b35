//! Session state owned by the round state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fairness::rows::RowPlan;
use crate::fairness::seeds::SeedCommitment;

/// Lifecycle status of a game session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Cashout,
    Completed,
    Lost,
    Revealed,
    Submitted,
}

impl SessionStatus {
    /// Pending/active sessions: restorable, prunable, still mutable by play.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Active)
    }

    /// The round outcome is decided (cashout, completed, or lost).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Cashout | SessionStatus::Completed | SessionStatus::Lost
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Cashout => write!(f, "cashout"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Lost => write!(f, "lost"),
            SessionStatus::Revealed => write!(f, "revealed"),
            SessionStatus::Submitted => write!(f, "submitted"),
        }
    }
}

/// Pick state of one generated row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RowPhase {
    Unplayed,
    Cleared,
    Crashed,
}

/// One row of the round: the committed layout plus what the player did with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    pub plan: RowPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_column: Option<u16>,
    pub phase: RowPhase,
}

impl RowRecord {
    pub fn unplayed(plan: RowPlan) -> Self {
        Self {
            plan,
            picked_column: None,
            phase: RowPhase::Unplayed,
        }
    }
}

/// Final figures for a finished round, derived from persisted progress only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    pub score: u64,
    pub rows_cleared: u32,
    pub final_multiplier: f64,
    pub time_alive_secs: i64,
    pub xp: u64,
}

/// Artifacts of a successful settlement submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReferences {
    pub session_key: String,
    pub nonce: u64,
    pub result_signature: String,
    pub experience_signature: String,
    pub signer_public_key: String,
    pub submitted_at: DateTime<Utc>,
}

/// Complete game session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub id: String,
    pub status: SessionStatus,
    pub user_address: String,
    pub game_id: u64,

    /// Wager declared at start; binding happens in wager registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wager_amount: Option<u64>,
    pub wager_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_tx: Option<String>,

    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce_base: u64,
    pub seed_revealed: bool,

    pub rows: Vec<RowRecord>,
    pub current_row: u32,
    pub current_multiplier: f64,
    pub completed_rows: u32,
    pub locked_tile_counts: Vec<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_summary: Option<RoundSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementReferences>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// Create a fresh pending session around a seed commitment.
    pub fn pending(
        id: String,
        user_address: String,
        game_id: u64,
        seeds: SeedCommitment,
        wager_amount: Option<u64>,
        locked_tile_counts: Vec<u16>,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Pending,
            user_address,
            game_id,
            wager_amount,
            wager_registered: false,
            escrow_tx: None,
            server_seed: seeds.server_seed,
            server_seed_hash: seeds.server_seed_hash,
            client_seed: seeds.client_seed,
            nonce_base: seeds.nonce_base,
            seed_revealed: false,
            rows: Vec::new(),
            current_row: 0,
            current_multiplier: 1.0,
            completed_rows: 0,
            locked_tile_counts,
            round_summary: None,
            settlement: None,
            created_at: now,
            updated_at: now,
            expires_at: now + lifetime,
            finalized_at: None,
        }
    }

    pub fn is_owned_by(&self, address: &str) -> bool {
        self.user_address == address
    }

    /// Compute the round summary from persisted numeric progress.
    pub fn derive_summary(
        &self,
        finalized_at: DateTime<Utc>,
        xp_base: u64,
        xp_per_row: u64,
    ) -> RoundSummary {
        RoundSummary {
            score: (self.current_multiplier * 1000.0).round() as u64,
            rows_cleared: self.completed_rows,
            final_multiplier: self.current_multiplier,
            time_alive_secs: (finalized_at - self.created_at).num_seconds().max(0),
            xp: xp_base + self.completed_rows as u64 * xp_per_row,
        }
    }
}
