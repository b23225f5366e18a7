//! Error types for the token vending machine.

use thiserror::Error;

use crate::models::scope::EntityScope;

#[derive(Debug, Error)]
pub enum TvmError {
    #[error("requested duration {requested_secs}s exceeds maximum of {max_secs}s")]
    DurationExceedsMaxAllowed { requested_secs: u64, max_secs: u64 },

    #[error("insufficient permissions: missing {missing}")]
    InsufficientPermissions { missing: EntityScope },

    #[error("token store failure: {0}")]
    StoreFailure(String),

    /// Primary-key collision on token insert. Retry with a fresh token.
    #[error("token already exists")]
    TokenConflict,

    #[error("improper usage: {reason}")]
    ImproperUsage { reason: String },

    #[error("token has expired")]
    TokenExpired,

    #[error("token not found")]
    TokenNotFound,

    #[error("identity exchange failed: {reason}")]
    ExchangeFailure { reason: String },

    #[error("entity not found: {entity}")]
    EntityNotFound { entity: String },

    #[error("entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("deadline exceeded after {after_ms}ms")]
    DeadlineExceeded { after_ms: u64 },
}

impl TvmError {
    /// Failures where retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TvmError::TokenConflict | TvmError::StoreFailure(_) | TvmError::DeadlineExceeded { .. }
        )
    }

    /// The bearer could not be authenticated (401-equivalent).
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            TvmError::TokenExpired | TvmError::TokenNotFound | TvmError::ExchangeFailure { .. }
        )
    }

    /// The bearer is known but not allowed (403-equivalent).
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            TvmError::InsufficientPermissions { .. } | TvmError::DurationExceedsMaxAllowed { .. }
        )
    }
}

pub type TvmResult<T> = Result<T, TvmError>;
