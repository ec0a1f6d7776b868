//! Token minting with the verifier's secret (development CLI and tests).

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use smt_core::Identity;

use crate::errors::AuthError;
use crate::verifier::Claims;

/// Signs HS256 identity tokens.
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    /// Create an issuer for `secret`.
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self {
            key: EncodingKey::from_secret(secret),
        })
    }

    /// Mint a token for `identity` valid for `ttl` from now.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        self.issue_at(identity, Utc::now(), ttl)
    }

    /// Mint a token as if issued at `issued_at`.
    pub fn issue_at(
        &self,
        identity: &Identity,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let iat = issued_at.timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: identity.user_id.clone(),
            username: identity.username.clone(),
            role: identity.role.as_str().to_owned(),
            exp: iat.saturating_add(ttl_secs),
            iat,
        };
        Ok(encode(&Header::default(), &claims, &self.key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smt_core::Role;

    #[test]
    fn empty_secret_rejected() {
        assert!(matches!(TokenIssuer::new(b""), Err(AuthError::EmptySecret)));
    }

    #[test]
    fn token_has_three_segments() {
        let issuer = TokenIssuer::new(b"s").unwrap();
        let token = issuer
            .issue(&Identity::new("u", "n", Role::Admin), Duration::from_secs(5))
            .unwrap();
        assert_eq!(token.split('.').count(), 3);
    }
}
