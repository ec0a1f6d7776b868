//! HS256 identity token verification.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use smt_core::{Identity, Role};
use tracing::debug;

use crate::errors::AuthRejection;

/// JWT claims carried by a dashboard identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Display name.
    pub username: String,
    /// Role name (`admin`, `scheduler`, `supervisor`, `floor_view`).
    pub role: String,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Issued at (Unix seconds).
    pub iat: i64,
}

/// Identity plus the instant its credential stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Who the token names.
    pub identity: Identity,
    /// Token expiry, leeway included.
    pub expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    /// Whether the credential has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Verifies bearer tokens against a shared HMAC secret.
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
    leeway_secs: i64,
}

impl IdentityVerifier {
    /// Create a verifier for `secret`, tolerating `leeway_secs` of clock skew on `exp`.
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is checked against the caller's clock in verify_at
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            leeway_secs: i64::try_from(leeway_secs).unwrap_or(i64::MAX),
        }
    }

    /// Verify `token` now, without a role restriction.
    pub fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthRejection> {
        self.verify_at(token, Utc::now(), None)
    }

    /// Verify `token` now and require its role to be in `allowed`.
    pub fn verify_for_roles(
        &self,
        token: &str,
        allowed: &[Role],
    ) -> Result<VerifiedIdentity, AuthRejection> {
        self.verify_at(token, Utc::now(), Some(allowed))
    }

    /// Verify `token` as of `now`.
    ///
    /// Pure: the result depends only on the token, the secret, `now` and
    /// `allowed`.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
        allowed: Option<&[Role]>,
    ) -> Result<VerifiedIdentity, AuthRejection> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthRejection::Missing);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "token decode failed");
            AuthRejection::Malformed(e.to_string())
        })?;
        let claims = data.claims;

        let expires_at = claims.exp.saturating_add(self.leeway_secs);
        if now.timestamp() > expires_at {
            return Err(AuthRejection::Expired);
        }

        let role: Role = claims
            .role
            .parse()
            .map_err(|r| AuthRejection::Malformed(format!("unknown role {r:?}")))?;

        if let Some(allowed) = allowed {
            if !allowed.contains(&role) {
                return Err(AuthRejection::RoleNotPermitted { role });
            }
        }

        if claims.sub.is_empty() {
            return Err(AuthRejection::Malformed("empty subject".into()));
        }

        let expires_at = Utc
            .timestamp_opt(expires_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(VerifiedIdentity {
            identity: Identity::new(claims.sub, claims.username, role),
            expires_at,
        })
    }
}
