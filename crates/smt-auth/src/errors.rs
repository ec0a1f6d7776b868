//! Authentication error types.

use smt_core::{RealtimeError, Role};
use thiserror::Error;

/// Why a credential was rejected. Always terminal for the connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejection {
    /// No credential was supplied.
    #[error("missing credential")]
    Missing,
    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,
    /// Bad encoding, bad signature, missing claims or unknown role.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Valid token whose role is outside the required set.
    #[error("role {role} not permitted")]
    RoleNotPermitted {
        /// Role carried by the token.
        role: Role,
    },
}

impl AuthRejection {
    /// Short reason string sent to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Malformed(_) => "malformed",
            Self::RoleNotPermitted { .. } => "role_not_permitted",
        }
    }
}

impl From<AuthRejection> for RealtimeError {
    fn from(r: AuthRejection) -> Self {
        RealtimeError::AuthRejected {
            reason: r.reason().to_owned(),
        }
    }
}

/// Errors minting tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The signing secret is empty.
    #[error("signing secret is empty")]
    EmptySecret,
    /// `jsonwebtoken` failed to encode the claims.
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable() {
        assert_eq!(AuthRejection::Missing.reason(), "missing");
        assert_eq!(AuthRejection::Expired.reason(), "expired");
        assert_eq!(AuthRejection::Malformed("x".into()).reason(), "malformed");
        assert_eq!(
            AuthRejection::RoleNotPermitted { role: Role::FloorView }.reason(),
            "role_not_permitted"
        );
    }

    #[test]
    fn converts_to_realtime_error() {
        let err: RealtimeError = AuthRejection::Expired.into();
        assert_eq!(err.code(), smt_core::errors::AUTH_REJECTED);
        assert_eq!(
            err,
            RealtimeError::AuthRejected {
                reason: "expired".into()
            }
        );
    }
}
