use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;

/// A verified remote party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Turns an opaque bearer credential into a verified [`Identity`].
///
/// Implementations must be cheap to call from many connection tasks at once;
/// the hub shares one verifier behind an `Arc` for the life of the process.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Strip an optional `Bearer ` scheme and surrounding whitespace.
pub(crate) fn strip_bearer(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_bearer_variants() {
        assert_eq!(strip_bearer("abc"), "abc");
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("  Bearer   abc \n"), "abc");
        assert_eq!(strip_bearer("bearer abc"), "bearer abc");
        assert_eq!(strip_bearer(""), "");
    }

    #[test]
    fn identity_display() {
        assert_eq!(Identity::new("alice").to_string(), "alice");
    }
}
