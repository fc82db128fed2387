//! Error types and stable error codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("unexpected signing algorithm")]
    UnexpectedAlgorithm,

    #[error("signing key is empty")]
    EmptySigningKey,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Malformed(_) => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "token_expired",
            Self::NotYetValid => "token_not_yet_valid",
            Self::UnexpectedAlgorithm => "unexpected_algorithm",
            Self::EmptySigningKey => "empty_signing_key",
            Self::Signing(_) => "signing_failed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnexpectedAlgorithm
            }
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Serializable error body for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
