//! Seed and commitment management
//!
//! A round's randomness is bound before play starts: the server seed is drawn
//! from OS randomness and only its SHA-256 commitment is published. The seed
//! itself stays out of every response until the round is terminal.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{TowerResult, ValidationError};

pub const SERVER_SEED_BYTES: usize = 32;
pub const CLIENT_SEED_BYTES: usize = 16;

/// Caller-supplied client seeds are kept verbatim but bounded.
const MAX_CLIENT_SEED_LEN: usize = 64;

/// Commitment issued at round creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    /// Hex-encoded secret; withheld until reveal
    pub server_seed: String,
    /// SHA-256 over the server seed string, hex-encoded; immutable once issued
    pub server_seed_hash: String,
    pub client_seed: String,
    /// Per-row nonces count up from here; 0 for a fresh commitment
    pub nonce_base: u64,
}

/// SHA-256 commitment over the hex seed string's bytes.
pub fn hash_server_seed(server_seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Produce a fresh commitment. A caller-supplied client seed survives the
/// reroll untouched; otherwise one is drawn from OS randomness.
pub fn generate_seeds(existing_client_seed: Option<&str>) -> TowerResult<SeedCommitment> {
    let client_seed = match existing_client_seed {
        Some(seed) => {
            let trimmed = seed.trim();
            if trimmed.is_empty() {
                return Err(ValidationError::InvalidClientSeed("empty".to_string()).into());
            }
            if trimmed.len() > MAX_CLIENT_SEED_LEN {
                return Err(ValidationError::InvalidClientSeed(format!(
                    "longer than {} characters",
                    MAX_CLIENT_SEED_LEN
                ))
                .into());
            }
            trimmed.to_string()
        }
        None => {
            let mut bytes = [0u8; CLIENT_SEED_BYTES];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    };

    let mut server_bytes = [0u8; SERVER_SEED_BYTES];
    OsRng.fill_bytes(&mut server_bytes);
    let server_seed = hex::encode(server_bytes);
    let server_seed_hash = hash_server_seed(&server_seed);

    Ok(SeedCommitment {
        server_seed,
        server_seed_hash,
        client_seed,
        nonce_base: 0,
    })
}
