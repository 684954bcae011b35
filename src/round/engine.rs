//! The round state machine.
//!
//! Every player action is a short-lived read-modify-write against the session
//! store; guards re-run on the fresh read inside the update, so a losing
//! concurrent request observes a conflict rather than corrupting state. Chain
//! calls happen before any session mutation and a chain failure aborts the
//! action untouched.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::errors::{
    AuthError, ConflictError, EngineError, TowerResult, ValidationError,
};
use crate::fairness::rows::{generate_rows, RowParams};
use crate::fairness::seeds::generate_seeds;
use crate::metrics::EngineMetrics;
use crate::round::types::{GameSession, RowPhase, RowRecord, SessionStatus};
use crate::settlement::attestation::{SettlementIssuer, SignedAttestations};
use crate::store::backend::StoreError;
use crate::store::session_store::SessionStore;

/// Parameters for opening a round.
#[derive(Debug, Clone)]
pub struct RoundRequest {
    pub player_address: String,
    pub wager_amount: Option<u64>,
    pub tile_min: u16,
    pub tile_max: u16,
    pub locked_tile_counts: Vec<u16>,
    pub client_seed: Option<String>,
}

pub struct RoundEngine {
    store: Arc<SessionStore>,
    settlement: SettlementIssuer,
    game: GameConfig,
    metrics: Arc<EngineMetrics>,
}

fn guard_caller(session: &GameSession, player: &str) -> TowerResult<()> {
    if !session.is_owned_by(player) {
        return Err(AuthError::NotSessionOwner {
            session_id: session.id.clone(),
        }
        .into());
    }
    if session.status == SessionStatus::Submitted {
        return Err(ConflictError::AlreadySubmitted.into());
    }
    Ok(())
}

impl RoundEngine {
    pub fn new(
        store: Arc<SessionStore>,
        settlement: SettlementIssuer,
        game: GameConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            settlement,
            game,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn game_config(&self) -> &GameConfig {
        &self.game
    }

    pub fn signer_public_key(&self) -> String {
        self.settlement.signer_public_key()
    }

    fn row_params(&self, req: &RoundRequest) -> TowerResult<RowParams> {
        if req.tile_min < self.game.min_tile_count
            || req.tile_max > self.game.max_tile_count
            || req.tile_min > req.tile_max
        {
            return Err(ValidationError::InvalidTileRange {
                min: req.tile_min,
                max: req.tile_max,
            }
            .into());
        }
        Ok(RowParams {
            tile_min: req.tile_min,
            tile_max: req.tile_max,
            bombs_per_row: self.game.bombs_per_row,
            house_edge: self.game.house_edge,
            multiplier_cap: self.game.multiplier_cap,
            default_row_count: self.game.default_row_count,
            max_generated_rows: self.game.max_generated_rows,
            safety_margin: self.game.safety_margin,
            locked_tile_counts: req.locked_tile_counts.clone(),
        })
    }

    /// Open a round: commit seeds, generate the row layout, persist the
    /// session as pending, then activate it with the rows attached.
    pub fn start_round(&self, req: &RoundRequest) -> TowerResult<GameSession> {
        let player = req.player_address.trim();
        if player.is_empty() {
            return Err(ValidationError::EmptyAddress.into());
        }
        if req.wager_amount == Some(0) {
            return Err(ValidationError::InvalidWagerAmount(0).into());
        }

        let params = self.row_params(req)?;
        let seeds = generate_seeds(req.client_seed.as_deref())?;
        let plans = generate_rows(&seeds, &params)?;

        let session = GameSession::pending(
            Uuid::new_v4().to_string(),
            player.to_string(),
            self.game.game_id,
            seeds,
            req.wager_amount,
            req.locked_tile_counts.clone(),
            self.store.policy().max_lifetime,
        );
        self.store.create(&session)?;

        let activated = self.store.update(&session.id, move |s| {
            s.rows = plans.into_iter().map(RowRecord::unplayed).collect();
            s.status = SessionStatus::Active;
            s.current_row = 0;
            s.current_multiplier = 1.0;
            Ok(())
        })?;

        self.metrics.record_round_started();
        tracing::info!(
            session_id = %activated.id,
            player = %activated.user_address,
            rows = activated.rows.len(),
            "round opened"
        );
        Ok(activated)
    }

    /// Reveal one tile on the current row.
    pub fn select_tile(
        &self,
        session_id: &str,
        player: &str,
        row_index: u32,
        column: u16,
    ) -> TowerResult<GameSession> {
        let xp_base = self.game.xp_base;
        let xp_per_row = self.game.xp_per_row;

        let updated = self.store.update(session_id, |s| {
            guard_caller(s, player)?;
            if s.status != SessionStatus::Active {
                return Err(ConflictError::RoundNotActive {
                    status: s.status.to_string(),
                }
                .into());
            }
            if row_index != s.current_row {
                return Err(ConflictError::NotCurrentRow {
                    requested: row_index,
                    current: s.current_row,
                }
                .into());
            }

            let idx = s.current_row as usize;
            let (tile_count, bomb_index, row_multiplier) = match s.rows.get(idx) {
                Some(row) => {
                    if row.phase != RowPhase::Unplayed {
                        return Err(ConflictError::RowAlreadyPlayed { row: row_index }.into());
                    }
                    (row.plan.tile_count, row.plan.bomb_index, row.plan.row_multiplier)
                }
                None => {
                    return Err(EngineError::Store(StoreError::Corrupted(format!(
                        "session {} current row is past its generated rows",
                        s.id
                    ))))
                }
            };
            if column >= tile_count {
                return Err(ValidationError::ColumnOutOfRange { column, tile_count }.into());
            }

            s.rows[idx].picked_column = Some(column);
            if column == bomb_index {
                s.rows[idx].phase = RowPhase::Crashed;
                let now = Utc::now();
                s.status = SessionStatus::Lost;
                s.finalized_at = Some(now);
                s.round_summary = Some(s.derive_summary(now, xp_base, xp_per_row));
            } else {
                s.rows[idx].phase = RowPhase::Cleared;
                s.current_multiplier *= row_multiplier;
                s.completed_rows += 1;
                s.current_row += 1;
                if s.current_row as usize == s.rows.len() {
                    let now = Utc::now();
                    s.status = SessionStatus::Completed;
                    s.finalized_at = Some(now);
                    s.round_summary = Some(s.derive_summary(now, xp_base, xp_per_row));
                }
            }
            Ok(())
        })?;

        self.metrics.record_tile_selected();
        match updated.status {
            SessionStatus::Lost => {
                self.metrics.record_round_lost();
                tracing::info!(session_id = %updated.id, rows_cleared = updated.completed_rows, "round lost");
            }
            SessionStatus::Completed => {
                self.metrics.record_round_completed();
                tracing::info!(session_id = %updated.id, multiplier = updated.current_multiplier, "round cleared");
            }
            _ => {}
        }
        Ok(updated)
    }

    /// Voluntary termination at the current multiplier.
    pub fn cash_out(&self, session_id: &str, player: &str) -> TowerResult<GameSession> {
        let xp_base = self.game.xp_base;
        let xp_per_row = self.game.xp_per_row;

        let updated = self.store.update(session_id, |s| {
            guard_caller(s, player)?;
            if s.status != SessionStatus::Active {
                return Err(ConflictError::RoundNotActive {
                    status: s.status.to_string(),
                }
                .into());
            }
            let now = Utc::now();
            s.status = SessionStatus::Cashout;
            s.finalized_at = Some(now);
            s.round_summary = Some(s.derive_summary(now, xp_base, xp_per_row));
            Ok(())
        })?;

        self.metrics.record_round_cashed_out();
        tracing::info!(
            session_id = %updated.id,
            multiplier = updated.current_multiplier,
            "round cashed out"
        );
        Ok(updated)
    }

    /// Bind the wager to on-chain escrow. Idempotent for the identical
    /// amount; a different amount is a conflict. Possessing the session id
    /// is not enough: the caller must be the bound player.
    pub async fn register_wager(
        &self,
        session_id: &str,
        player: &str,
        amount: u64,
        tx_reference: Option<&str>,
    ) -> TowerResult<GameSession> {
        if amount == 0 {
            return Err(ValidationError::InvalidWagerAmount(0).into());
        }

        let current = self.store.get(session_id)?;
        guard_caller(&current, player)?;
        if current.wager_registered {
            let registered = current.wager_amount.unwrap_or(0);
            if registered == amount {
                return Ok(current);
            }
            return Err(ConflictError::WagerMismatch {
                registered,
                requested: amount,
            }
            .into());
        }

        let (_session_key, escrow_tx) = self
            .settlement
            .verify_escrow(
                &current.user_address,
                current.game_id,
                &current.id,
                amount,
                tx_reference,
            )
            .await?;

        let updated = self.store.update(session_id, |s| {
            guard_caller(s, player)?;
            if s.wager_registered {
                let registered = s.wager_amount.unwrap_or(0);
                if registered == amount {
                    return Ok(());
                }
                return Err(ConflictError::WagerMismatch {
                    registered,
                    requested: amount,
                }
                .into());
            }
            s.wager_amount = Some(amount);
            s.wager_registered = true;
            s.escrow_tx = escrow_tx.clone();
            Ok(())
        })?;

        self.metrics.record_wager_registered();
        tracing::info!(session_id = %updated.id, amount, "wager registered");
        Ok(updated)
    }

    /// Disclose the server seed once the round has a terminal outcome. A lost
    /// session keeps its status; cashout/completed become revealed. Repeating
    /// the call is idempotent.
    pub fn reveal(&self, session_id: &str) -> TowerResult<GameSession> {
        self.store.update(session_id, |s| {
            if s.status.is_live() {
                return Err(ConflictError::RoundNotTerminal {
                    status: s.status.to_string(),
                }
                .into());
            }
            if s.status == SessionStatus::Submitted {
                return Err(ConflictError::AlreadySubmitted.into());
            }
            s.seed_revealed = true;
            if matches!(s.status, SessionStatus::Cashout | SessionStatus::Completed) {
                s.status = SessionStatus::Revealed;
            }
            Ok(())
        })
    }

    /// Issue both settlement attestations, mark the session submitted, and
    /// archive it out of the live keyspace.
    pub async fn settle(
        &self,
        session_id: &str,
        player: &str,
    ) -> TowerResult<(GameSession, SignedAttestations)> {
        let current = self.store.get(session_id)?;
        guard_caller(&current, player)?;
        if current.status.is_live() {
            return Err(ConflictError::RoundNotTerminal {
                status: current.status.to_string(),
            }
            .into());
        }
        if !current.wager_registered {
            return Err(ConflictError::WagerNotRegistered.into());
        }
        if current.round_summary.is_none() {
            return Err(ConflictError::SummaryMissing.into());
        }

        let signed = self.settlement.issue(&current).await?;

        let submitted_at = Utc::now();
        let refs = crate::round::types::SettlementReferences {
            session_key: signed.session_key.clone(),
            nonce: signed.nonce,
            result_signature: signed.result_signature.clone(),
            experience_signature: signed.experience_signature.clone(),
            signer_public_key: signed.signer_public_key.clone(),
            submitted_at,
        };
        self.store.update(session_id, |s| {
            guard_caller(s, player)?;
            if !s.wager_registered {
                return Err(ConflictError::WagerNotRegistered.into());
            }
            if s.round_summary.is_none() {
                return Err(ConflictError::SummaryMissing.into());
            }
            s.status = SessionStatus::Submitted;
            s.settlement = Some(refs.clone());
            Ok(())
        })?;
        let archived = self.store.archive(session_id)?;

        self.metrics.record_attestations_issued();
        tracing::info!(
            session_id = %archived.id,
            session_key = %signed.session_key,
            "round settled and archived"
        );
        Ok((archived, signed))
    }

    /// Recover the player's most recent live session, refreshing its expiry.
    pub fn restore_session(&self, player: &str) -> TowerResult<GameSession> {
        let player = player.trim();
        if player.is_empty() {
            return Err(ValidationError::EmptyAddress.into());
        }
        self.store.restore_latest_for_user(player)
    }

    /// Audit read of a finished session, from the live or archive keyspace.
    pub fn session_record(&self, session_id: &str) -> TowerResult<GameSession> {
        if let Some(session) = self.store.try_get(session_id)? {
            if session.status.is_live() {
                return Err(ConflictError::RoundNotTerminal {
                    status: session.status.to_string(),
                }
                .into());
            }
            return Ok(session);
        }
        if let Some(session) = self.store.get_archived(session_id)? {
            return Ok(session);
        }
        Err(crate::errors::NotFoundError::SessionNotFound(session_id.to_string()).into())
    }

    /// Archived history for a player, newest first.
    pub fn recent_sessions(&self, player: &str, limit: usize) -> TowerResult<Vec<GameSession>> {
        self.store.recent_for_user(player, limit)
    }

    /// Delete expired pending/active sessions; safe to invoke concurrently.
    pub fn prune_expired(&self) -> TowerResult<usize> {
        let pruned = self.store.prune_expired(Utc::now())?;
        if pruned > 0 {
            self.metrics.record_sessions_pruned(pruned as u64);
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TowerlineConfig;
    use crate::fairness::seeds::hash_server_seed;
    use crate::settlement::attestation::{verify_signature, AttestationSigner};
    use crate::settlement::chain::{
        derive_session_key, ChainClient, ChainError, InProcessLedger, TxReceipt,
    };
    use crate::store::session_store::StorePolicy;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fixture() -> (RoundEngine, Arc<InProcessLedger>) {
        let cfg = TowerlineConfig::default();
        let ledger = Arc::new(InProcessLedger::new());
        fixture_with_chain(ledger.clone(), &cfg)
    }

    fn fixture_with_chain(
        chain: Arc<dyn ChainClient>,
        cfg: &TowerlineConfig,
    ) -> (RoundEngine, Arc<InProcessLedger>) {
        let store = Arc::new(SessionStore::memory_only(StorePolicy::from_config(
            &cfg.store,
        )));
        let issuer = SettlementIssuer::new(chain, AttestationSigner::from_seed([1u8; 32]), cfg);
        let engine = RoundEngine::new(
            store,
            issuer,
            cfg.game.clone(),
            Arc::new(EngineMetrics::new()),
        );
        (engine, Arc::new(InProcessLedger::new()))
    }

    fn three_tile_request() -> RoundRequest {
        RoundRequest {
            player_address: "alice".to_string(),
            wager_amount: Some(500),
            tile_min: 3,
            tile_max: 3,
            locked_tile_counts: vec![],
            client_seed: None,
        }
    }

    fn safe_column(session: &GameSession, row: usize) -> u16 {
        let plan = &session.rows[row].plan;
        (plan.bomb_index + 1) % plan.tile_count
    }

    fn fund_escrow(ledger: &InProcessLedger, session: &GameSession, amount: u64) {
        let key = derive_session_key(&session.user_address, session.game_id, &session.id);
        ledger.deposit_escrow(&session.user_address, &key, amount);
    }

    #[test]
    fn test_start_round_activates_with_rows() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.rows.is_empty());
        assert_eq!(session.current_row, 0);
        assert_eq!(session.current_multiplier, 1.0);
        assert_eq!(session.server_seed_hash, hash_server_seed(&session.server_seed));
        assert!(session.rows.iter().all(|r| r.phase == RowPhase::Unplayed));
    }

    #[test]
    fn test_start_round_input_validation() {
        let (engine, _) = fixture();

        let mut empty = three_tile_request();
        empty.player_address = "  ".to_string();
        assert_eq!(engine.start_round(&empty).unwrap_err().code(), "INVALID_ADDRESS");

        let mut zero_wager = three_tile_request();
        zero_wager.wager_amount = Some(0);
        assert_eq!(engine.start_round(&zero_wager).unwrap_err().code(), "INVALID_WAGER");

        let mut bad_range = three_tile_request();
        bad_range.tile_min = 1;
        assert_eq!(
            engine.start_round(&bad_range).unwrap_err().code(),
            "INVALID_TILE_RANGE"
        );
    }

    #[test]
    fn test_locked_counts_shape_rows() {
        let (engine, _) = fixture();
        let req = RoundRequest {
            player_address: "alice".to_string(),
            wager_amount: None,
            tile_min: 3,
            tile_max: 6,
            locked_tile_counts: vec![4, 6],
            client_seed: None,
        };
        let session = engine.start_round(&req).unwrap();
        assert_eq!(session.rows[0].plan.tile_count, 4);
        assert_eq!(session.rows[1].plan.tile_count, 6);
        assert!(session.rows[2..]
            .iter()
            .all(|r| (3..=6).contains(&r.plan.tile_count)));
    }

    #[test]
    fn test_scenario_two_safe_picks_then_bomb() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        let s = engine
            .select_tile(&id, "alice", 0, safe_column(&session, 0))
            .unwrap();
        let s = engine.select_tile(&id, "alice", 1, safe_column(&s, 1)).unwrap();
        assert!((s.current_multiplier - 1.425 * 1.425).abs() < 1e-9);
        assert_eq!(s.completed_rows, 2);

        let bomb = s.rows[2].plan.bomb_index;
        let lost = engine.select_tile(&id, "alice", 2, bomb).unwrap();

        assert_eq!(lost.status, SessionStatus::Lost);
        assert_eq!(lost.completed_rows, 2);
        assert_eq!(lost.rows[2].phase, RowPhase::Crashed);
        assert!(lost.finalized_at.is_some());

        let summary = lost.round_summary.unwrap();
        assert_eq!(summary.score, 2031);
        assert_eq!(summary.rows_cleared, 2);
    }

    #[test]
    fn test_full_clear_completes_round() {
        let (engine, _) = fixture();
        let mut session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();
        let total_rows = session.rows.len();

        for row in 0..total_rows {
            let column = safe_column(&session, row);
            session = engine.select_tile(&id, "alice", row as u32, column).unwrap();
        }

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_rows as usize, total_rows);
        let summary = session.round_summary.unwrap();
        assert_eq!(summary.rows_cleared as usize, total_rows);
    }

    #[test]
    fn test_select_tile_rejects_wrong_owner() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        let err = engine
            .select_tile(&session.id, "mallory", 0, 0)
            .unwrap_err();
        assert_eq!(err.code(), "NOT_SESSION_OWNER");

        let stored = engine.store().get(&session.id).unwrap();
        assert_eq!(stored.rows[0].phase, RowPhase::Unplayed);
    }

    #[test]
    fn test_select_tile_row_ordering_guards() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        let err = engine.select_tile(&id, "alice", 1, 0).unwrap_err();
        assert_eq!(err.code(), "NOT_CURRENT_ROW");

        engine
            .select_tile(&id, "alice", 0, safe_column(&session, 0))
            .unwrap();
        let err = engine.select_tile(&id, "alice", 0, 0).unwrap_err();
        assert_eq!(err.code(), "NOT_CURRENT_ROW");
    }

    #[test]
    fn test_select_tile_rejects_out_of_range_column() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        let err = engine.select_tile(&session.id, "alice", 0, 99).unwrap_err();
        assert_eq!(err.code(), "COLUMN_OUT_OF_RANGE");

        let stored = engine.store().get(&session.id).unwrap();
        assert_eq!(stored.rows[0].phase, RowPhase::Unplayed);
        assert_eq!(stored.current_row, 0);
    }

    #[test]
    fn test_cash_out_derives_summary() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        engine
            .select_tile(&id, "alice", 0, safe_column(&session, 0))
            .unwrap();
        let cashed = engine.cash_out(&id, "alice").unwrap();

        assert_eq!(cashed.status, SessionStatus::Cashout);
        let summary = cashed.round_summary.unwrap();
        assert_eq!(summary.rows_cleared, 1);
        assert_eq!(summary.score, 1425);

        let err = engine.cash_out(&id, "alice").unwrap_err();
        assert_eq!(err.code(), "ROUND_NOT_ACTIVE");
    }

    #[test]
    fn test_reveal_requires_terminal_then_discloses() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        let err = engine.reveal(&id).unwrap_err();
        assert_eq!(err.code(), "ROUND_NOT_TERMINAL");

        engine.cash_out(&id, "alice").unwrap();
        let revealed = engine.reveal(&id).unwrap();
        assert_eq!(revealed.status, SessionStatus::Revealed);
        assert!(revealed.seed_revealed);
        assert_eq!(
            hash_server_seed(&revealed.server_seed),
            revealed.server_seed_hash
        );

        // Idempotent on repeat.
        let again = engine.reveal(&id).unwrap();
        assert_eq!(again.status, SessionStatus::Revealed);
    }

    #[test]
    fn test_reveal_preserves_lost_status() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        let bomb = session.rows[0].plan.bomb_index;
        engine.select_tile(&id, "alice", 0, bomb).unwrap();

        let revealed = engine.reveal(&id).unwrap();
        assert_eq!(revealed.status, SessionStatus::Lost);
        assert!(revealed.seed_revealed);
    }

    #[tokio::test]
    async fn test_register_wager_idempotent_and_mismatch() {
        let cfg = TowerlineConfig::default();
        let ledger = Arc::new(InProcessLedger::new());
        let (engine, _) = fixture_with_chain(ledger.clone(), &cfg);

        let session = engine.start_round(&three_tile_request()).unwrap();
        fund_escrow(&ledger, &session, 500);

        let first = engine
            .register_wager(&session.id, "alice", 500, None)
            .await
            .unwrap();
        assert!(first.wager_registered);
        assert_eq!(first.wager_amount, Some(500));

        let second = engine
            .register_wager(&session.id, "alice", 500, None)
            .await
            .unwrap();
        assert!(second.wager_registered);

        let err = engine
            .register_wager(&session.id, "alice", 700, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WAGER_MISMATCH");
    }

    #[tokio::test]
    async fn test_register_wager_requires_escrow() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        let err = engine
            .register_wager(&session.id, "alice", 500, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ESCROW_NOT_FOUND");

        let stored = engine.store().get(&session.id).unwrap();
        assert!(!stored.wager_registered);
    }

    #[tokio::test]
    async fn test_settle_full_flow() {
        let cfg = TowerlineConfig::default();
        let ledger = Arc::new(InProcessLedger::new());
        let (engine, _) = fixture_with_chain(ledger.clone(), &cfg);

        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();
        fund_escrow(&ledger, &session, 500);
        engine.register_wager(&id, "alice", 500, None).await.unwrap();

        engine
            .select_tile(&id, "alice", 0, safe_column(&session, 0))
            .unwrap();
        engine.cash_out(&id, "alice").unwrap();

        let (settled, signed) = engine.settle(&id, "alice").await.unwrap();
        assert_eq!(settled.status, SessionStatus::Submitted);
        let refs = settled.settlement.as_ref().unwrap();
        assert_eq!(refs.nonce, signed.nonce);
        assert_eq!(refs.session_key, signed.session_key);

        // Out of the live keyspace, retained in the archive.
        assert_eq!(engine.store().get(&id).unwrap_err().code(), "SESSION_NOT_FOUND");
        assert!(engine.store().get_archived(&id).unwrap().is_some());

        assert!(verify_signature(
            &signed.signer_public_key,
            &signed.result.encode(),
            &signed.result_signature
        ));
        assert!(verify_signature(
            &signed.signer_public_key,
            &signed.experience.encode(),
            &signed.experience_signature
        ));
        assert_eq!(signed.result.kills, 1);
        assert_eq!(signed.result.wager, 500);
    }

    #[tokio::test]
    async fn test_settle_guards() {
        let cfg = TowerlineConfig::default();
        let ledger = Arc::new(InProcessLedger::new());
        let (engine, _) = fixture_with_chain(ledger.clone(), &cfg);

        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();

        let err = engine.settle(&id, "alice").await.unwrap_err();
        assert_eq!(err.code(), "ROUND_NOT_TERMINAL");

        engine.cash_out(&id, "alice").unwrap();
        let err = engine.settle(&id, "alice").await.unwrap_err();
        assert_eq!(err.code(), "WAGER_NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_settle_chain_failure_leaves_session_untouched() {
        struct FlakyNonce {
            inner: InProcessLedger,
            fail_nonce: AtomicBool,
        }

        #[async_trait::async_trait]
        impl ChainClient for FlakyNonce {
            async fn escrow_amount(&self, key: &str) -> Result<Option<u64>, ChainError> {
                self.inner.escrow_amount(key).await
            }
            async fn escrow_amount_at(
                &self,
                key: &str,
                block: u64,
            ) -> Result<Option<u64>, ChainError> {
                self.inner.escrow_amount_at(key, block).await
            }
            async fn wait_for_receipt(&self, tx: &str) -> Result<TxReceipt, ChainError> {
                self.inner.wait_for_receipt(tx).await
            }
            async fn xp_nonce(&self, user: &str, game_id: u64) -> Result<u64, ChainError> {
                if self.fail_nonce.load(Ordering::SeqCst) {
                    return Err(ChainError::NonceUnavailable {
                        user: user.to_string(),
                    });
                }
                self.inner.xp_nonce(user, game_id).await
            }
        }

        let cfg = TowerlineConfig::default();
        let chain = Arc::new(FlakyNonce {
            inner: InProcessLedger::new(),
            fail_nonce: AtomicBool::new(false),
        });
        let (engine, _) = fixture_with_chain(chain.clone(), &cfg);

        let session = engine.start_round(&three_tile_request()).unwrap();
        let id = session.id.clone();
        let key = derive_session_key("alice", session.game_id, &id);
        chain.inner.deposit_escrow("alice", &key, 500);
        engine.register_wager(&id, "alice", 500, None).await.unwrap();
        engine.cash_out(&id, "alice").unwrap();

        chain.fail_nonce.store(true, Ordering::SeqCst);
        let err = engine.settle(&id, "alice").await.unwrap_err();
        assert_eq!(err.code(), "NONCE_UNAVAILABLE");
        assert!(err.retryable());

        let stored = engine.store().get(&id).unwrap();
        assert_eq!(stored.status, SessionStatus::Cashout);
        assert!(stored.settlement.is_none());
    }

    #[test]
    fn test_session_record_refuses_live_sessions() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        let err = engine.session_record(&session.id).unwrap_err();
        assert_eq!(err.code(), "ROUND_NOT_TERMINAL");

        engine.cash_out(&session.id, "alice").unwrap();
        let record = engine.session_record(&session.id).unwrap();
        assert_eq!(record.status, SessionStatus::Cashout);
    }

    #[test]
    fn test_restore_returns_latest_live_session() {
        let (engine, _) = fixture();
        let session = engine.start_round(&three_tile_request()).unwrap();

        let restored = engine.restore_session("alice").unwrap();
        assert_eq!(restored.id, session.id);

        assert_eq!(
            engine.restore_session("nobody").unwrap_err().code(),
            "NO_RESTORABLE_SESSION"
        );
        assert_eq!(engine.restore_session("  ").unwrap_err().code(), "INVALID_ADDRESS");
    }
}
