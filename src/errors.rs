//! Error types for the Towerline round engine
//!
//! Central taxonomy with stable symbolic codes and error chains

use std::error::Error as StdError;
use std::fmt;

use crate::settlement::chain::ChainError;
use crate::store::backend::StoreError;

/// Root error type for all engine operations
#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, rejected before any state change
    Validation(ValidationError),

    /// Caller does not own the session
    Auth(AuthError),

    /// Action legal in shape but not in the session's current state
    Conflict(ConflictError),

    /// Unknown or expired resource
    NotFound(NotFoundError),

    /// Session store failures
    Store(StoreError),

    /// On-chain read/wait failures
    Chain(ChainError),
}

/// Input validation errors
#[derive(Debug)]
pub enum ValidationError {
    EmptyAddress,
    InvalidClientSeed(String),
    InvalidTileRange { min: u16, max: u16 },
    LockedCountOutOfRange { row: usize, count: u16, min: u16, max: u16 },
    ColumnOutOfRange { column: u16, tile_count: u16 },
    InvalidWagerAmount(u64),
    MissingField(&'static str),
}

/// Authorization errors
#[derive(Debug)]
pub enum AuthError {
    NotSessionOwner { session_id: String },
}

/// State conflicts; the caller should refetch and retry from fresh state
#[derive(Debug)]
pub enum ConflictError {
    RoundNotActive { status: String },
    RoundNotTerminal { status: String },
    NotCurrentRow { requested: u32, current: u32 },
    RowAlreadyPlayed { row: u32 },
    WagerMismatch { registered: u64, requested: u64 },
    WagerNotRegistered,
    AlreadySubmitted,
    SummaryMissing,
    SessionExists(String),
}

/// Missing resources
#[derive(Debug)]
pub enum NotFoundError {
    SessionNotFound(String),
    NoRestorableSession(String),
}

impl EngineError {
    /// Stable symbolic code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(e) => match e {
                ValidationError::EmptyAddress => "INVALID_ADDRESS",
                ValidationError::InvalidClientSeed(_) => "INVALID_CLIENT_SEED",
                ValidationError::InvalidTileRange { .. } => "INVALID_TILE_RANGE",
                ValidationError::LockedCountOutOfRange { .. } => "INVALID_LOCKED_COUNTS",
                ValidationError::ColumnOutOfRange { .. } => "COLUMN_OUT_OF_RANGE",
                ValidationError::InvalidWagerAmount(_) => "INVALID_WAGER",
                ValidationError::MissingField(_) => "MISSING_FIELD",
            },
            EngineError::Auth(AuthError::NotSessionOwner { .. }) => "NOT_SESSION_OWNER",
            EngineError::Conflict(e) => match e {
                ConflictError::RoundNotActive { .. } => "ROUND_NOT_ACTIVE",
                ConflictError::RoundNotTerminal { .. } => "ROUND_NOT_TERMINAL",
                ConflictError::NotCurrentRow { .. } => "NOT_CURRENT_ROW",
                ConflictError::RowAlreadyPlayed { .. } => "ROW_ALREADY_PLAYED",
                ConflictError::WagerMismatch { .. } => "WAGER_MISMATCH",
                ConflictError::WagerNotRegistered => "WAGER_NOT_REGISTERED",
                ConflictError::AlreadySubmitted => "ALREADY_SUBMITTED",
                ConflictError::SummaryMissing => "SUMMARY_MISSING",
                ConflictError::SessionExists(_) => "SESSION_EXISTS",
            },
            EngineError::NotFound(e) => match e {
                NotFoundError::SessionNotFound(_) => "SESSION_NOT_FOUND",
                NotFoundError::NoRestorableSession(_) => "NO_RESTORABLE_SESSION",
            },
            EngineError::Store(e) => match e {
                StoreError::Corrupted(_) => "STORE_CORRUPTED",
                _ => "STORE_UNAVAILABLE",
            },
            EngineError::Chain(e) => match e {
                ChainError::Timeout { .. } => "CHAIN_TIMEOUT",
                ChainError::Rpc(_) => "CHAIN_UNAVAILABLE",
                ChainError::EscrowNotFound(_) => "ESCROW_NOT_FOUND",
                ChainError::EscrowMismatch { .. } => "ESCROW_MISMATCH",
                ChainError::ReceiptNotFound(_) => "RECEIPT_NOT_FOUND",
                ChainError::EventMismatch { .. } => "ESCROW_EVENT_MISMATCH",
                ChainError::NonceUnavailable { .. } => "NONCE_UNAVAILABLE",
            },
        }
    }

    /// Infrastructure failures are safe to retry; everything else is not.
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::Chain(_))
    }
}

// Display implementations
impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "Validation error: {}", e),
            EngineError::Auth(e) => write!(f, "Authorization error: {}", e),
            EngineError::Conflict(e) => write!(f, "Conflict: {}", e),
            EngineError::NotFound(e) => write!(f, "Not found: {}", e),
            EngineError::Store(e) => write!(f, "Store error: {}", e),
            EngineError::Chain(e) => write!(f, "Chain error: {}", e),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyAddress => write!(f, "player address must not be empty"),
            ValidationError::InvalidClientSeed(reason) => {
                write!(f, "client seed rejected: {}", reason)
            }
            ValidationError::InvalidTileRange { min, max } => {
                write!(f, "tile range [{}, {}] is not usable", min, max)
            }
            ValidationError::LockedCountOutOfRange { row, count, min, max } => {
                write!(
                    f,
                    "locked tile count {} for row {} outside [{}, {}]",
                    count, row, min, max
                )
            }
            ValidationError::ColumnOutOfRange { column, tile_count } => {
                write!(f, "column {} out of range for {} tiles", column, tile_count)
            }
            ValidationError::InvalidWagerAmount(amount) => {
                write!(f, "wager amount {} is not acceptable", amount)
            }
            ValidationError::MissingField(field) => write!(f, "required field missing: {}", field),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NotSessionOwner { session_id } => {
                write!(f, "caller is not the owner of session {}", session_id)
            }
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::RoundNotActive { status } => {
                write!(f, "round is not active (status: {})", status)
            }
            ConflictError::RoundNotTerminal { status } => {
                write!(f, "round has not finished (status: {})", status)
            }
            ConflictError::NotCurrentRow { requested, current } => {
                write!(f, "row {} is not the current row {}", requested, current)
            }
            ConflictError::RowAlreadyPlayed { row } => {
                write!(f, "row {} was already played", row)
            }
            ConflictError::WagerMismatch { registered, requested } => {
                write!(
                    f,
                    "wager already registered as {}, re-registration of {} refused",
                    registered, requested
                )
            }
            ConflictError::WagerNotRegistered => write!(f, "no wager registered for this round"),
            ConflictError::AlreadySubmitted => write!(f, "session was already submitted"),
            ConflictError::SummaryMissing => write!(f, "round summary has not been computed"),
            ConflictError::SessionExists(id) => write!(f, "session {} already exists", id),
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundError::SessionNotFound(id) => write!(f, "session {} not found", id),
            NotFoundError::NoRestorableSession(user) => {
                write!(f, "no restorable session for {}", user)
            }
        }
    }
}

// Standard Error trait implementations
impl StdError for EngineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            EngineError::Validation(e) => Some(e),
            EngineError::Auth(e) => Some(e),
            EngineError::Conflict(e) => Some(e),
            EngineError::NotFound(e) => Some(e),
            EngineError::Store(e) => Some(e),
            EngineError::Chain(e) => Some(e),
        }
    }
}

impl StdError for ValidationError {}
impl StdError for AuthError {}
impl StdError for ConflictError {}
impl StdError for NotFoundError {}

// From implementations for easy conversion
impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<AuthError> for EngineError {
    fn from(e: AuthError) -> Self {
        EngineError::Auth(e)
    }
}

impl From<ConflictError> for EngineError {
    fn from(e: ConflictError) -> Self {
        EngineError::Conflict(e)
    }
}

impl From<NotFoundError> for EngineError {
    fn from(e: NotFoundError) -> Self {
        EngineError::NotFound(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<ChainError> for EngineError {
    fn from(e: ChainError) -> Self {
        EngineError::Chain(e)
    }
}

// Convenience type alias for Results
pub type TowerResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conflict = ConflictError::RoundNotActive {
            status: "lost".to_string(),
        };
        let err = EngineError::Conflict(conflict);

        assert!(err.to_string().contains("Conflict"));
        assert!(err.to_string().contains("lost"));
    }

    #[test]
    fn test_conflict_error_details() {
        let err = ConflictError::NotCurrentRow {
            requested: 4,
            current: 2,
        };

        assert!(err.to_string().contains("row 4"));
        assert!(err.to_string().contains("current row 2"));
    }

    #[test]
    fn test_error_conversion() {
        let not_found = NotFoundError::SessionNotFound("abc".to_string());
        let err: EngineError = not_found.into();

        match err {
            EngineError::NotFound(_) => {}
            _ => panic!("Expected not-found error"),
        }
    }

    #[test]
    fn test_error_source() {
        let err = EngineError::Auth(AuthError::NotSessionOwner {
            session_id: "abc".to_string(),
        });

        assert!(err.source().is_some());
    }

    #[test]
    fn test_symbolic_codes() {
        let cases: Vec<(EngineError, &str)> = vec![
            (
                EngineError::Validation(ValidationError::EmptyAddress),
                "INVALID_ADDRESS",
            ),
            (
                EngineError::Auth(AuthError::NotSessionOwner {
                    session_id: "s".to_string(),
                }),
                "NOT_SESSION_OWNER",
            ),
            (
                EngineError::Conflict(ConflictError::AlreadySubmitted),
                "ALREADY_SUBMITTED",
            ),
            (
                EngineError::NotFound(NotFoundError::SessionNotFound("s".to_string())),
                "SESSION_NOT_FOUND",
            ),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_retryable_split() {
        let conflict = EngineError::Conflict(ConflictError::AlreadySubmitted);
        assert!(!conflict.retryable());

        let chain = EngineError::Chain(ChainError::Timeout {
            call: "escrow_amount",
            timeout_ms: 5000,
        });
        assert!(chain.retryable());
        assert_eq!(chain.code(), "CHAIN_TIMEOUT");
    }
}
