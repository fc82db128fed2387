//! Bearer-token identity primitives for the fanout hub.
//!
//! The hub never looks inside a credential itself: it hands the first frame
//! of a connection to a [`CredentialVerifier`] and either gets back an
//! [`Identity`] or an [`AuthError`].

pub mod error;
pub mod identity;
pub mod token;

pub use error::AuthError;
pub use identity::{CredentialVerifier, Identity};
pub use token::{Claims, JwtVerifier, TokenIssuer};
