//! Identity adapter error types.

use thiserror::Error;
use tvm_core::error::TvmError;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),

    #[error("identity provider rejected the token ({status})")]
    Rejected { status: u16 },

    #[error("malformed userinfo response: {0}")]
    Malformed(String),

    #[error("no usable email in userinfo response")]
    MissingEmail,

    #[error("email is not verified by the provider")]
    UnverifiedEmail,
}

impl From<IdentityError> for TvmError {
    fn from(err: IdentityError) -> Self {
        TvmError::ExchangeFailure {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IdentityError::Malformed(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}
