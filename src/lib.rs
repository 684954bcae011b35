//! Towerline - Provably-Fair Round Engine
//!
//! Backend for a row-based wagering mini-game: pick a safe tile per row,
//! cash out before the hidden bomb. The engine covers:
//! - Commit-reveal seed management (hash published before any outcome exists)
//! - Deterministic per-row bomb placement with independent verification
//! - A session state machine with authorization and idempotency guards
//! - Durable session storage with a sticky in-process fallback
//! - Signed settlement attestations for an external ledger contract

pub mod api;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod metrics;
pub mod round;
pub mod settlement;
pub mod store;

pub use config::TowerlineConfig;
pub use errors::{EngineError, TowerResult};
pub use fairness::{generate_seeds, verify_round, SeedCommitment};
pub use round::{GameSession, RoundEngine, SessionStatus};
pub use settlement::{AttestationSigner, SettlementIssuer};
pub use store::{SessionStore, StorePolicy};
