//! HS256 JWT issuing and verification.
//!
//! Tokens carry a single custom claim, `username`, next to the registered
//! `iat`/`nbf`/`exp` timestamps. The signing secret is passed in explicitly;
//! there is no process-wide key.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AuthError;
use crate::identity::{CredentialVerifier, Identity, strip_bearer};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Claims valid from `now` for `ttl`.
    ///
    /// Fails when the expiry does not fit in a JWT timestamp.
    pub fn new(username: impl Into<String>, now: i64, ttl: Duration) -> Result<Self, AuthError> {
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                AuthError::Signing(format!("token lifetime of {}s is too long", ttl.as_secs()))
            })?;
        Ok(Self {
            username: username.into(),
            iat: now,
            nbf: now,
            exp,
        })
    }
}

/// Mints signed tokens for a username.
pub struct TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySigningKey);
        }
        Ok(Self {
            key: EncodingKey::from_secret(secret),
            ttl,
        })
    }

    pub fn issue(&self, username: &str) -> Result<String, AuthError> {
        let claims = Claims::new(username, chrono::Utc::now().timestamp(), self.ttl)?;
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

/// Verifies HS256 tokens signed with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8], leeway_secs: u64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySigningKey);
        }
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = leeway_secs;
        validation.validate_nbf = true;
        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Decode and validate, returning the raw claims.
    pub fn claims(&self, token: &str) -> Result<Claims, AuthError> {
        let token = strip_bearer(token);
        if token.is_empty() {
            return Err(AuthError::Malformed("empty credential".into()));
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.username.trim().is_empty() {
            return Err(AuthError::Malformed("missing username claim".into()));
        }
        Ok(data.claims)
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.claims(token).map(|c| Identity::new(c.username))
    }
}
