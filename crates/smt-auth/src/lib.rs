//! # smt-auth
//!
//! Bearer-token verification for realtime connections.
//!
//! Tokens are HS256 JWTs minted by the dashboard's login endpoint. The
//! [`IdentityVerifier`] is immutable after construction and safe to share
//! across every connection attempt; verification depends only on the token,
//! the signing secret and the supplied clock reading.

#![deny(unsafe_code)]

pub mod errors;
pub mod issuer;
pub mod verifier;

pub use errors::{AuthError, AuthRejection};
pub use issuer::TokenIssuer;
pub use verifier::{Claims, IdentityVerifier, VerifiedIdentity};
