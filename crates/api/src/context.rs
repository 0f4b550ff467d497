//! Request-scoped context.
//!
//! `auth_middleware` inserts a [`RequestContext`] into every request; the
//! access gate fills in its permissions and adds the [`Access`] decision.

use axum::extract::Query;
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use serde::Deserialize;

pub use wacrm_auth::{Access, AuthContext, RequestContext};

use crate::app::errors::json_error;

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The `token` query value, if any.
pub fn download_token(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

/// The authenticated caller, or a 401 response.
pub fn require_auth(ctx: &RequestContext) -> Result<AuthContext, Response> {
    ctx.auth
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized"))
}
