//! Provably-fair round mechanics
//!
//! Covers the commit-reveal lifecycle end to end:
//! - Seed commitments published before any outcome exists
//! - Deterministic per-row bomb placement from the keyed hash stream
//! - Independent verification against a revealed server seed

pub mod rows;
pub mod seeds;
pub mod verify;

pub use rows::{generate_rows, planned_row_count, row_multiplier, RowParams, RowPlan};
pub use seeds::{generate_seeds, hash_server_seed, SeedCommitment};
pub use verify::{
    verify_commitment, verify_round, verify_row, ClaimedRow, RowCheck, VerificationReport,
};
