use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wacrm_core::{UserId, WorkspaceId};

use crate::gate::AuthContext;

/// Access-token claims.
///
/// Issuance lives in the session service; this crate only verifies.
/// Timestamps are Unix seconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: the authenticated user.
    pub sub: UserId,

    /// Workspace the token is scoped to.
    pub workspace_id: WorkspaceId,

    /// Issued-at (seconds).
    pub iat: i64,

    /// Expiration (seconds).
    pub exp: i64,
}

impl AccessClaims {
    pub fn auth_context(&self) -> AuthContext {
        AuthContext {
            user_id: self.sub,
            workspace_id: self.workspace_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token was issued for a different export")]
    WrongExport,
}

/// Deterministically validate an `iat`/`exp` window against `now`.
pub fn validate_window(iat: i64, exp: i64, now: DateTime<Utc>) -> Result<(), TokenError> {
    if exp <= iat {
        return Err(TokenError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < iat {
        return Err(TokenError::NotYetValid);
    }
    if now >= exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}

/// Verifies bearer tokens and yields their claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError>;
}

/// HS256 shared-secret validator.
#[derive(Clone)]
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = decode_hs256(token, &self.key)?;
        validate_window(claims.iat, claims.exp, now)?;
        Ok(claims)
    }
}

/// Signature check only; time checks are done against an explicit `now`.
pub(crate) fn decode_hs256<T>(token: &str, key: &DecodingKey) -> Result<T, TokenError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;

    jsonwebtoken::decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| TokenError::Malformed(e.to_string()))
}

pub(crate) fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    fn mint(secret: &str, claims: &AccessClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>, ttl: Duration) -> AccessClaims {
        AccessClaims {
            sub: UserId::new(),
            workspace_id: WorkspaceId::new(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let now = Utc::now();
        let c = claims(now, Duration::minutes(10));
        let validator = Hs256JwtValidator::new("s3cret");

        let decoded = validator.validate(&mint("s3cret", &c), now).unwrap();
        assert_eq!(decoded, c);
        assert_eq!(decoded.auth_context().workspace_id, c.workspace_id);
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let now = Utc::now();
        let token = mint("other", &claims(now, Duration::minutes(10)));

        let err = Hs256JwtValidator::new("s3cret").validate(&token, now).unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[test]
    fn window_checks() {
        let now = Utc::now();
        let t = now.timestamp();
        assert_eq!(validate_window(t, t, now), Err(TokenError::InvalidTimeWindow));
        assert_eq!(validate_window(t + 5, t + 60, now), Err(TokenError::NotYetValid));
        assert_eq!(validate_window(t - 60, t, now), Err(TokenError::Expired));
        assert_eq!(validate_window(t - 60, t + 60, now), Ok(()));
    }
}
