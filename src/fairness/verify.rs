//! Independent round verification
//!
//! Recomputes committed outcomes from a revealed server seed. The hash and
//! sampling steps are re-derived here rather than shared with the generator;
//! the audit path and any external reimplementation must agree with the
//! generator byte for byte, and the tests below pin that agreement.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{TowerResult, ValidationError};
use crate::fairness::rows::MAX_TILE_COUNT;

type HmacSha256 = Hmac<Sha256>;

/// One row as claimed by a reveal transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedRow {
    pub tile_count: u16,
    pub claimed_bomb_index: u16,
}

/// Outcome of re-deriving a single row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowCheck {
    pub nonce: u64,
    pub valid: bool,
    pub recomputed_bomb_index: u16,
    pub recomputed_hash: String,
}

/// Full-round verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub commitment_valid: bool,
    pub rows: Vec<RowCheck>,
    pub all_valid: bool,
}

/// Check the published commitment against a revealed seed.
pub fn verify_commitment(server_seed: &str, server_seed_hash: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hex::encode(hasher.finalize()) == server_seed_hash.trim().to_lowercase()
}

/// Recompute one row's game hash and bomb placement from a revealed seed.
pub fn verify_row(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    tile_count: u16,
    bombs_per_row: u16,
    claimed_bomb_index: u16,
) -> TowerResult<RowCheck> {
    if tile_count == 0
        || tile_count > MAX_TILE_COUNT
        || bombs_per_row == 0
        || bombs_per_row >= tile_count
    {
        return Err(ValidationError::InvalidTileRange {
            min: tile_count,
            max: tile_count,
        }
        .into());
    }

    let mut mac = HmacSha256::new_from_slice(server_seed.as_bytes()).expect("HMAC key");
    mac.update(format!("{}:{}", client_seed, nonce).as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut block = [0u8; 32];
    block.copy_from_slice(&digest);

    let positions = recompute_positions(block, tile_count, bombs_per_row);
    let recomputed_bomb_index = positions[0];

    Ok(RowCheck {
        nonce,
        valid: recomputed_bomb_index == claimed_bomb_index,
        recomputed_bomb_index,
        recomputed_hash: hex::encode(block),
    })
}

/// Verify a whole claimed round: the seed commitment plus every row.
pub fn verify_round(
    server_seed: &str,
    server_seed_hash: &str,
    client_seed: &str,
    nonce_base: u64,
    bombs_per_row: u16,
    rows: &[ClaimedRow],
) -> TowerResult<VerificationReport> {
    let commitment_valid = verify_commitment(server_seed, server_seed_hash);

    let mut checks = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        checks.push(verify_row(
            server_seed,
            client_seed,
            nonce_base + i as u64,
            row.tile_count,
            bombs_per_row,
            row.claimed_bomb_index,
        )?);
    }

    let all_valid = commitment_valid && checks.iter().all(|c| c.valid);
    Ok(VerificationReport {
        commitment_valid,
        rows: checks,
        all_valid,
    })
}

/// Walk the digest byte stream exactly as the generator does: one byte per
/// draw, modulo-bias bytes discarded, SHA-256 chaining when the block runs
/// out, positions removed without replacement.
fn recompute_positions(digest: [u8; 32], tile_count: u16, bombs_per_row: u16) -> Vec<u16> {
    let mut block = digest;
    let mut cursor = 0usize;
    let mut remaining: Vec<u16> = (0..tile_count).collect();
    let mut picked = Vec::with_capacity(bombs_per_row as usize);

    while picked.len() < bombs_per_row as usize {
        let n = remaining.len() as u32;
        let limit = 256 - (256 % n);
        loop {
            if cursor == block.len() {
                let mut hasher = Sha256::new();
                hasher.update(block);
                block.copy_from_slice(&hasher.finalize());
                cursor = 0;
            }
            let byte = block[cursor] as u32;
            cursor += 1;
            if byte < limit {
                picked.push(remaining.remove((byte % n) as usize));
                break;
            }
        }
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::rows::{generate_rows, RowParams};
    use crate::fairness::seeds::{generate_seeds, hash_server_seed, SeedCommitment};

    fn params() -> RowParams {
        RowParams {
            tile_min: 3,
            tile_max: 7,
            bombs_per_row: 1,
            house_edge: 0.05,
            multiplier_cap: 1000.0,
            default_row_count: 9,
            max_generated_rows: 64,
            safety_margin: 2,
            locked_tile_counts: vec![],
        }
    }

    #[test]
    fn test_generator_and_verifier_agree() {
        let seeds = generate_seeds(None).unwrap();
        let rows = generate_rows(&seeds, &params()).unwrap();

        for row in &rows {
            let check = verify_row(
                &seeds.server_seed,
                &seeds.client_seed,
                row.nonce,
                row.tile_count,
                row.bombs_per_row,
                row.bomb_index,
            )
            .unwrap();

            assert!(check.valid);
            assert_eq!(check.recomputed_bomb_index, row.bomb_index);
            assert_eq!(check.recomputed_hash, row.game_hash);
        }
    }

    #[test]
    fn test_tampered_bomb_index_detected() {
        let seeds = generate_seeds(None).unwrap();
        let rows = generate_rows(&seeds, &params()).unwrap();
        let row = &rows[0];

        let forged = (row.bomb_index + 1) % row.tile_count;
        let check = verify_row(
            &seeds.server_seed,
            &seeds.client_seed,
            row.nonce,
            row.tile_count,
            row.bombs_per_row,
            forged,
        )
        .unwrap();

        assert!(!check.valid);
        assert_eq!(check.recomputed_bomb_index, row.bomb_index);
    }

    #[test]
    fn test_round_report() {
        let seeds = generate_seeds(None).unwrap();
        let rows = generate_rows(&seeds, &params()).unwrap();
        let claimed: Vec<ClaimedRow> = rows
            .iter()
            .map(|r| ClaimedRow {
                tile_count: r.tile_count,
                claimed_bomb_index: r.bomb_index,
            })
            .collect();

        let report = verify_round(
            &seeds.server_seed,
            &seeds.server_seed_hash,
            &seeds.client_seed,
            seeds.nonce_base,
            1,
            &claimed,
        )
        .unwrap();

        assert!(report.commitment_valid);
        assert!(report.all_valid);
        assert_eq!(report.rows.len(), rows.len());
    }

    #[test]
    fn test_wrong_commitment_fails_round() {
        let seeds = generate_seeds(None).unwrap();
        let other = generate_seeds(None).unwrap();
        let rows = generate_rows(&seeds, &params()).unwrap();
        let claimed: Vec<ClaimedRow> = rows
            .iter()
            .map(|r| ClaimedRow {
                tile_count: r.tile_count,
                claimed_bomb_index: r.bomb_index,
            })
            .collect();

        let report = verify_round(
            &seeds.server_seed,
            &other.server_seed_hash,
            &seeds.client_seed,
            seeds.nonce_base,
            1,
            &claimed,
        )
        .unwrap();

        assert!(!report.commitment_valid);
        assert!(!report.all_valid);
        // Row recomputation is independent of the commitment check.
        assert!(report.rows.iter().all(|c| c.valid));
    }

    #[test]
    fn test_commitment_check_is_case_insensitive() {
        let seed = "ab".repeat(32);
        let hash = hash_server_seed(&seed).to_uppercase();
        assert!(verify_commitment(&seed, &hash));
    }

    #[test]
    fn test_degenerate_row_rejected() {
        assert!(verify_row("s", "c", 0, 0, 1, 0).is_err());
        assert!(verify_row("s", "c", 0, 3, 3, 0).is_err());
    }

    #[test]
    fn test_tile_count_beyond_byte_range_rejected() {
        // Single-byte sampling cannot serve more than 256 tiles; a claim that
        // large must be rejected up front instead of entering the loop.
        assert!(verify_row("s", "c", 0, 300, 1, 0).is_err());
        assert!(verify_row("s", "c", 0, u16::MAX, 1, 0).is_err());
        assert!(verify_row("s", "c", 0, 256, 1, 0).is_ok());
    }

    #[test]
    fn test_known_commitment_shape() {
        let seeds = SeedCommitment {
            server_seed: "cc".repeat(32),
            server_seed_hash: hash_server_seed(&"cc".repeat(32)),
            client_seed: "dd".repeat(16),
            nonce_base: 0,
        };
        assert!(verify_commitment(&seeds.server_seed, &seeds.server_seed_hash));
        assert!(!verify_commitment(&seeds.server_seed, &"0".repeat(64)));
    }
}
