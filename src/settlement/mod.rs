//! Settlement: escrow verification and signed attestations for the ledger.

pub mod attestation;
pub mod chain;

pub use attestation::{
    verify_signature, AttestationSigner, ExperienceAttestation, ResultAttestation,
    SettlementIssuer, SignedAttestations, RESULT_DOMAIN, XP_DOMAIN,
};
pub use chain::{derive_session_key, ChainClient, ChainError, EscrowEvent, InProcessLedger, TxReceipt};
