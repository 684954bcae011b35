//! Round lifecycle: session state and the state machine that drives it.

pub mod engine;
pub mod types;

pub use engine::RoundEngine;
pub use types::{
    GameSession, RoundSummary, RowPhase, RowRecord, SessionStatus, SettlementReferences,
};
