//! Signed settlement attestations.
//!
//! Two Ed25519 messages are issued per finished round, under separate signing
//! domains, for consumption by the external ledger contract: a result
//! attestation (score/payout claim) and an experience attestation (xp grant
//! bound to a monotonic nonce). Encodings are the domain tag followed by
//! length-prefixed UTF-8 strings and big-endian integers in field order.

use chrono::{Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::config::TowerlineConfig;
use crate::errors::{ConflictError, TowerResult};
use crate::round::types::GameSession;
use crate::settlement::chain::{derive_session_key, ChainClient, ChainError};
use crate::store::backend::{SessionBackend, StoreError};

pub const RESULT_DOMAIN: &[u8] = b"TOWERLINE_RESULT_V1";
pub const XP_DOMAIN: &[u8] = b"TOWERLINE_XP_V1";

/// Ed25519 signer whose seed persists in the durable backend.
pub struct AttestationSigner {
    key: SigningKey,
}

impl AttestationSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn generate() -> Self {
        use rand_core::OsRng;
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the signing seed from storage, creating and persisting one on
    /// first start so attestation identity survives restarts.
    pub fn load_or_create(backend: &dyn SessionBackend) -> TowerResult<Self> {
        const SIGNER_SEED_KEY: &str = "signer:attestation_seed";

        if let Some(existing) = backend.get(SIGNER_SEED_KEY)? {
            let seed: [u8; 32] = existing.try_into().map_err(|_| {
                StoreError::Corrupted("attestation seed must be 32 bytes".to_string())
            })?;
            return Ok(Self::from_seed(seed));
        }

        let signer = Self::generate();
        backend.put(SIGNER_SEED_KEY, &signer.key.to_bytes())?;
        Ok(signer)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.key.sign(message).to_bytes())
    }
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Result claim for one finished round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultAttestation {
    pub user: String,
    pub game_id: u64,
    pub session_id: String,
    pub score: u64,
    pub kills: u32,
    pub time_alive: i64,
    pub wager: u64,
    pub multiplier_x100: u64,
    pub xp: u64,
    pub deadline: i64,
}

impl ResultAttestation {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(RESULT_DOMAIN);
        push_str(&mut buf, &self.user);
        buf.extend_from_slice(&self.game_id.to_be_bytes());
        push_str(&mut buf, &self.session_id);
        buf.extend_from_slice(&self.score.to_be_bytes());
        buf.extend_from_slice(&(self.kills as u64).to_be_bytes());
        buf.extend_from_slice(&(self.time_alive.max(0) as u64).to_be_bytes());
        buf.extend_from_slice(&self.wager.to_be_bytes());
        buf.extend_from_slice(&self.multiplier_x100.to_be_bytes());
        buf.extend_from_slice(&self.xp.to_be_bytes());
        buf.extend_from_slice(&(self.deadline.max(0) as u64).to_be_bytes());
        buf
    }
}

/// Experience grant bound to the user's on-chain nonce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperienceAttestation {
    pub user: String,
    pub game_id: u64,
    pub xp: u64,
    pub nonce: u64,
    pub deadline: i64,
}

impl ExperienceAttestation {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(XP_DOMAIN);
        push_str(&mut buf, &self.user);
        buf.extend_from_slice(&self.game_id.to_be_bytes());
        buf.extend_from_slice(&self.xp.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&(self.deadline.max(0) as u64).to_be_bytes());
        buf
    }
}

/// Everything the ledger contract needs to accept a settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAttestations {
    pub session_key: String,
    pub nonce: u64,
    pub result: ResultAttestation,
    pub result_signature: String,
    pub experience: ExperienceAttestation,
    pub experience_signature: String,
    pub signer_public_key: String,
}

/// Standalone signature check over the documented encodings.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Verifies escrow state and issues both signed attestations.
pub struct SettlementIssuer {
    chain: Arc<dyn ChainClient>,
    signer: AttestationSigner,
    call_timeout: std::time::Duration,
    receipt_timeout: std::time::Duration,
    validity_window: Duration,
}

impl SettlementIssuer {
    pub fn new(chain: Arc<dyn ChainClient>, signer: AttestationSigner, cfg: &TowerlineConfig) -> Self {
        Self {
            chain,
            signer,
            call_timeout: cfg.call_timeout(),
            receipt_timeout: cfg.receipt_timeout(),
            validity_window: Duration::seconds(cfg.attestation.validity_window_secs as i64),
        }
    }

    pub fn signer_public_key(&self) -> String {
        self.signer.public_key_hex()
    }

    async fn bounded<T, F>(
        &self,
        call: &'static str,
        timeout: std::time::Duration,
        fut: F,
    ) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout {
                call,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Confirm the wager is escrowed under this session's key.
    ///
    /// Prefers the direct view read. When the escrow is not yet visible, waits
    /// for the referenced deposit transaction, matches its event log, and
    /// re-reads the escrow at the confirmed height to close the race between
    /// submission and confirmation. Returns the confirming tx hash when the
    /// receipt path was taken.
    pub async fn verify_escrow(
        &self,
        user: &str,
        game_id: u64,
        session_id: &str,
        amount: u64,
        tx_reference: Option<&str>,
    ) -> TowerResult<(String, Option<String>)> {
        let session_key = derive_session_key(user, game_id, session_id);

        let viewed = self
            .bounded(
                "escrow_amount",
                self.call_timeout,
                self.chain.escrow_amount(&session_key),
            )
            .await?;
        if let Some(found) = viewed {
            if found != amount {
                return Err(ChainError::EscrowMismatch {
                    expected: amount,
                    found,
                }
                .into());
            }
            return Ok((session_key, None));
        }

        let tx = match tx_reference {
            Some(tx) => tx,
            None => return Err(ChainError::EscrowNotFound(session_key).into()),
        };
        let receipt = self
            .bounded(
                "wait_for_receipt",
                self.receipt_timeout,
                self.chain.wait_for_receipt(tx),
            )
            .await?;

        let event_matches = receipt
            .events
            .iter()
            .any(|e| e.bettor == user && e.session_key == session_key && e.amount == amount);
        if !event_matches {
            return Err(ChainError::EventMismatch { tx: tx.to_string() }.into());
        }

        let at_height = self
            .bounded(
                "escrow_amount_at",
                self.call_timeout,
                self.chain.escrow_amount_at(&session_key, receipt.block_number),
            )
            .await?;
        match at_height {
            Some(found) if found == amount => Ok((session_key, Some(receipt.tx_hash))),
            Some(found) => Err(ChainError::EscrowMismatch {
                expected: amount,
                found,
            }
            .into()),
            None => Err(ChainError::EscrowNotFound(session_key).into()),
        }
    }

    /// Sign both attestations for a finalized session. Pure with respect to
    /// the session record: the caller applies the submitted transition.
    pub async fn issue(&self, session: &GameSession) -> TowerResult<SignedAttestations> {
        let summary = session
            .round_summary
            .as_ref()
            .ok_or(ConflictError::SummaryMissing)?;
        let wager = session
            .wager_amount
            .ok_or(ConflictError::WagerNotRegistered)?;

        let session_key =
            derive_session_key(&session.user_address, session.game_id, &session.id);
        let nonce = self
            .bounded(
                "xp_nonce",
                self.call_timeout,
                self.chain.xp_nonce(&session.user_address, session.game_id),
            )
            .await?;
        let deadline = (Utc::now() + self.validity_window).timestamp();

        let result = ResultAttestation {
            user: session.user_address.clone(),
            game_id: session.game_id,
            session_id: session.id.clone(),
            score: summary.score,
            kills: summary.rows_cleared,
            time_alive: summary.time_alive_secs,
            wager,
            multiplier_x100: (summary.final_multiplier * 100.0).round() as u64,
            xp: summary.xp,
            deadline,
        };
        let experience = ExperienceAttestation {
            user: session.user_address.clone(),
            game_id: session.game_id,
            xp: summary.xp,
            nonce,
            deadline,
        };

        let result_signature = self.signer.sign_hex(&result.encode());
        let experience_signature = self.signer.sign_hex(&experience.encode());
        tracing::info!(
            session_id = %session.id,
            nonce,
            score = summary.score,
            "settlement attestations signed"
        );

        Ok(SignedAttestations {
            session_key,
            nonce,
            result,
            result_signature,
            experience,
            experience_signature,
            signer_public_key: self.signer.public_key_hex(),
        })
    }
}
