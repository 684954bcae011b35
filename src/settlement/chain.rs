//! On-chain escrow and nonce reads behind an async client trait.
//!
//! Production deployments implement `ChainClient` against their node RPC;
//! the standalone binary and the test suite run on `InProcessLedger`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{call} timed out after {timeout_ms}ms")]
    Timeout { call: &'static str, timeout_ms: u64 },

    #[error("chain rpc failed: {0}")]
    Rpc(String),

    #[error("no escrow found for session key {0}")]
    EscrowNotFound(String),

    #[error("escrow amount mismatch: expected {expected}, found {found}")]
    EscrowMismatch { expected: u64, found: u64 },

    #[error("no receipt found for transaction {0}")]
    ReceiptNotFound(String),

    #[error("transaction {tx} confirmed without a matching escrow event")]
    EventMismatch { tx: String },

    #[error("experience nonce unavailable for {user}")]
    NonceUnavailable { user: String },
}

/// Escrow deposit event as it appears in a transaction log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowEvent {
    pub bettor: String,
    pub session_key: String,
    pub amount: u64,
}

/// Confirmed-transaction receipt with its event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub events: Vec<EscrowEvent>,
}

/// Read-side contract against the settlement chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Currently escrowed amount for a session key, if any.
    async fn escrow_amount(&self, session_key: &str) -> Result<Option<u64>, ChainError>;

    /// Escrowed amount as observed at a specific block height.
    async fn escrow_amount_at(
        &self,
        session_key: &str,
        block: u64,
    ) -> Result<Option<u64>, ChainError>;

    /// Block until the transaction confirms, then return its receipt.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, ChainError>;

    /// Monotonic per-user, per-game experience nonce.
    async fn xp_nonce(&self, user: &str, game_id: u64) -> Result<u64, ChainError>;
}

/// Session key binding `(user, game, session)` for escrow lookups.
pub fn derive_session_key(user: &str, game_id: u64, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(game_id.to_be_bytes());
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic in-process ledger: an escrow table with deposit heights, a
/// receipt log, and an experience-nonce registry.
#[derive(Debug, Default)]
pub struct InProcessLedger {
    escrows: DashMap<String, (u64, u64)>,
    receipts: DashMap<String, TxReceipt>,
    nonces: DashMap<(String, u64), u64>,
    height: AtomicU64,
}

impl InProcessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an escrow deposit and return the confirming transaction hash.
    pub fn deposit_escrow(&self, bettor: &str, session_key: &str, amount: u64) -> String {
        let block = self.height.fetch_add(1, Ordering::SeqCst) + 1;

        let mut hasher = Sha256::new();
        hasher.update(bettor.as_bytes());
        hasher.update(session_key.as_bytes());
        hasher.update(amount.to_be_bytes());
        hasher.update(block.to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        self.escrows
            .insert(session_key.to_string(), (amount, block));
        self.receipts.insert(
            tx_hash.clone(),
            TxReceipt {
                tx_hash: tx_hash.clone(),
                block_number: block,
                events: vec![EscrowEvent {
                    bettor: bettor.to_string(),
                    session_key: session_key.to_string(),
                    amount,
                }],
            },
        );
        tx_hash
    }

    pub fn set_xp_nonce(&self, user: &str, game_id: u64, nonce: u64) {
        self.nonces.insert((user.to_string(), game_id), nonce);
    }
}

#[async_trait]
impl ChainClient for InProcessLedger {
    async fn escrow_amount(&self, session_key: &str) -> Result<Option<u64>, ChainError> {
        Ok(self.escrows.get(session_key).map(|e| e.value().0))
    }

    async fn escrow_amount_at(
        &self,
        session_key: &str,
        block: u64,
    ) -> Result<Option<u64>, ChainError> {
        Ok(self
            .escrows
            .get(session_key)
            .filter(|e| e.value().1 <= block)
            .map(|e| e.value().0))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, ChainError> {
        self.receipts
            .get(tx_hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| ChainError::ReceiptNotFound(tx_hash.to_string()))
    }

    async fn xp_nonce(&self, user: &str, game_id: u64) -> Result<u64, ChainError> {
        Ok(self
            .nonces
            .get(&(user.to_string(), game_id))
            .map(|n| *n.value())
            .unwrap_or(0))
    }
}
