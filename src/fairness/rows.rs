//! Deterministic row generation
//!
//! Every row's bomb placement is a pure function of the seed commitment and
//! the row's nonce: HMAC-SHA256 keyed by the server seed produces the game
//! hash, and bomb positions are rejection-sampled from its byte stream. Row
//! count is sized dynamically against the cumulative multiplier cap.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::seeds::SeedCommitment;
use crate::errors::{TowerResult, ValidationError};

type HmacSha256 = Hmac<Sha256>;

/// Largest tile count the sampler can serve. Draws consume one byte each, so
/// with more than 256 candidates no byte is ever acceptable and the rejection
/// loop cannot terminate.
pub const MAX_TILE_COUNT: u16 = 256;

/// Inputs for one round's row generation
#[derive(Debug, Clone)]
pub struct RowParams {
    pub tile_min: u16,
    pub tile_max: u16,
    pub bombs_per_row: u16,
    pub house_edge: f64,
    pub multiplier_cap: f64,
    pub default_row_count: u32,
    pub max_generated_rows: u32,
    pub safety_margin: u32,
    /// Explicit per-row tile counts; rows past the end use range derivation
    pub locked_tile_counts: Vec<u16>,
}

/// Fairness descriptor for a single row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPlan {
    pub row_index: u32,
    pub nonce: u64,
    pub tile_count: u16,
    pub bombs_per_row: u16,
    pub bomb_index: u16,
    pub row_multiplier: f64,
    /// Hex HMAC digest this row's bombs were sampled from
    pub game_hash: String,
    /// Per-tile bomb probability, one entry per tile
    pub probabilities: Vec<f64>,
}

/// Keyed digest for a row: HMAC-SHA256(server_seed, "{client_seed}:{nonce}").
pub fn game_hash_bytes(server_seed: &str, client_seed: &str, nonce: u64) -> [u8; 32] {
    keyed_digest(server_seed, &format!("{}:{}", client_seed, nonce))
}

fn keyed_digest(server_seed: &str, message: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(server_seed.as_bytes()).expect("HMAC key");
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Byte stream over a digest; extends deterministically by hashing the
/// previous block when exhausted.
struct HashStream {
    block: [u8; 32],
    pos: usize,
}

impl HashStream {
    fn new(block: [u8; 32]) -> Self {
        Self { block, pos: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        if self.pos == self.block.len() {
            let mut hasher = Sha256::new();
            hasher.update(self.block);
            self.block.copy_from_slice(&hasher.finalize());
            self.pos = 0;
        }
        let byte = self.block[self.pos];
        self.pos += 1;
        byte
    }
}

/// Uniform draw in [0, n). Bytes that would bias the modulo are discarded and
/// the next segment of the stream is tried instead.
fn sample_uniform(stream: &mut HashStream, n: u16) -> u16 {
    let n = n as u32;
    let limit = 256 - (256 % n);
    loop {
        let byte = stream.next_byte() as u32;
        if byte < limit {
            return (byte % n) as u16;
        }
    }
}

/// Distinct positions out of [0, tile_count), drawn without replacement.
fn sample_without_replacement(stream: &mut HashStream, tile_count: u16, count: u16) -> Vec<u16> {
    let mut remaining: Vec<u16> = (0..tile_count).collect();
    let mut picked = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let idx = sample_uniform(stream, remaining.len() as u16);
        picked.push(remaining.remove(idx as usize));
    }
    picked
}

/// Bomb positions for a row. The first entry is the row's `bomb_index`.
pub fn bomb_positions(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    tile_count: u16,
    bombs_per_row: u16,
) -> Vec<u16> {
    let digest = game_hash_bytes(server_seed, client_seed, nonce);
    let mut stream = HashStream::new(digest);
    sample_without_replacement(&mut stream, tile_count, bombs_per_row)
}

/// Tile count for a ranged row, drawn from an independent keyed hash so the
/// bomb stream offsets stay identical for locked and ranged rows.
pub fn derive_tile_count(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    min: u16,
    max: u16,
) -> u16 {
    if min == max {
        return min;
    }
    let digest = keyed_digest(server_seed, &format!("{}:{}:size", client_seed, nonce));
    let mut stream = HashStream::new(digest);
    min + sample_uniform(&mut stream, max - min + 1)
}

/// Inverse survival probability discounted by the house edge.
pub fn row_multiplier(tile_count: u16, bombs_per_row: u16, house_edge: f64) -> f64 {
    let tiles = tile_count as f64;
    let safe = (tile_count - bombs_per_row) as f64;
    (tiles / safe) * (1.0 - house_edge)
}

/// Rows needed for the cumulative product to approach the multiplier cap,
/// sized from the worst-case (largest tile count, smallest multiplier) row and
/// clamped to the configured bounds.
pub fn planned_row_count(params: &RowParams) -> u32 {
    let worst = row_multiplier(params.tile_max, params.bombs_per_row, params.house_edge);
    let estimate = if worst > 1.0 {
        (params.multiplier_cap.ln() / worst.ln()).ceil() as u32 + params.safety_margin
    } else {
        params.default_row_count
    };
    estimate.clamp(params.default_row_count, params.max_generated_rows)
}

fn validate_params(params: &RowParams) -> TowerResult<()> {
    if params.bombs_per_row == 0
        || params.tile_min <= params.bombs_per_row
        || params.tile_max < params.tile_min
        || params.tile_max > MAX_TILE_COUNT
    {
        return Err(ValidationError::InvalidTileRange {
            min: params.tile_min,
            max: params.tile_max,
        }
        .into());
    }

    for (row, &count) in params.locked_tile_counts.iter().enumerate() {
        if count < params.tile_min || count > params.tile_max {
            return Err(ValidationError::LockedCountOutOfRange {
                row,
                count,
                min: params.tile_min,
                max: params.tile_max,
            }
            .into());
        }
    }

    Ok(())
}

/// Generate the full row set for a round. Generation stops early once the
/// running multiplier preview meets or exceeds the cap; the truncating row is
/// kept, so at least one row always survives.
pub fn generate_rows(seeds: &SeedCommitment, params: &RowParams) -> TowerResult<Vec<RowPlan>> {
    validate_params(params)?;

    let planned = planned_row_count(params);
    let mut rows = Vec::with_capacity(planned as usize);
    let mut preview = 1.0f64;

    for i in 0..planned {
        let nonce = seeds.nonce_base + i as u64;
        let tile_count = match params.locked_tile_counts.get(i as usize) {
            Some(&count) => count,
            None => derive_tile_count(
                &seeds.server_seed,
                &seeds.client_seed,
                nonce,
                params.tile_min,
                params.tile_max,
            ),
        };

        let digest = game_hash_bytes(&seeds.server_seed, &seeds.client_seed, nonce);
        let mut stream = HashStream::new(digest);
        let positions = sample_without_replacement(&mut stream, tile_count, params.bombs_per_row);
        let multiplier = row_multiplier(tile_count, params.bombs_per_row, params.house_edge);
        let bomb_probability = params.bombs_per_row as f64 / tile_count as f64;

        rows.push(RowPlan {
            row_index: i,
            nonce,
            tile_count,
            bombs_per_row: params.bombs_per_row,
            bomb_index: positions[0],
            row_multiplier: multiplier,
            game_hash: hex::encode(digest),
            probabilities: vec![bomb_probability; tile_count as usize],
        });

        preview *= multiplier;
        if preview >= params.multiplier_cap {
            break;
        }
    }

    Ok(rows)
}
