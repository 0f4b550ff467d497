//! Signed, short-lived report download links.
//!
//! A download token lets a browser fetch a finished export without a bearer
//! header. The access gate only checks that a token is *present* on the
//! download route; the download handler verifies it here.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use wacrm_core::{ExportId, WorkspaceId};

use crate::claims::{decode_hs256, timestamp, validate_window, TokenError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadClaims {
    pub export_id: ExportId,
    pub workspace_id: WorkspaceId,
    pub iat: i64,
    pub exp: i64,
}

impl DownloadClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.exp)
    }
}

#[derive(Clone)]
pub struct DownloadTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl DownloadTokens {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            ttl,
        }
    }

    pub fn issue(
        &self,
        export_id: ExportId,
        workspace_id: WorkspaceId,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = DownloadClaims {
            export_id,
            workspace_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Malformed(e.to_string()))
    }

    /// Verify `token` for the export named in the request path.
    pub fn verify(
        &self,
        token: &str,
        export_id: ExportId,
        now: DateTime<Utc>,
    ) -> Result<DownloadClaims, TokenError> {
        let claims: DownloadClaims = decode_hs256(token, &self.decoding)?;
        validate_window(claims.iat, claims.exp, now)?;
        if claims.export_id != export_id {
            return Err(TokenError::WrongExport);
        }
        Ok(claims)
    }
}
