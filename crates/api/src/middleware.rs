use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, error, warn};

use wacrm_auth::{AccessError, AccessGate, JwtValidator, Method, PermissionLookup};

use crate::app::errors::{access_error_response, json_error};
use crate::context::{download_token, RequestContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Establish the caller.
///
/// A missing, malformed or expired bearer token leaves the request anonymous.
/// The gate then answers 401 wherever a permission is required, while public
/// routes stay reachable.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ctx = match extract_bearer(req.headers()) {
        None => RequestContext::anonymous(),
        Some(token) => match state.jwt.validate(token, Utc::now()) {
            Ok(claims) => RequestContext::authenticated(claims.auth_context()),
            Err(e) => {
                debug!(error = %e, "bearer token rejected, continuing anonymously");
                RequestContext::anonymous()
            }
        },
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        debug!("empty bearer token ignored");
        return None;
    }
    Some(token)
}

#[derive(Clone)]
pub struct GateState {
    pub gate: Arc<AccessGate<Arc<dyn PermissionLookup>>>,
}

/// Run the access gate for every request.
///
/// The permission lookup is blocking, so the check runs on the blocking pool.
pub async fn access_gate_middleware(
    State(state): State<GateState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let mut ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    let method = Method::parse(req.method().as_str());
    let path = req.uri().path().to_string();
    let token = download_token(req.uri());
    let gate = state.gate.clone();

    let checked = tokio::task::spawn_blocking(move || {
        let decision = gate.check(&mut ctx, method, &path, token.as_deref());
        (ctx, decision)
    })
    .await;

    let (ctx, decision) = match checked {
        Ok(checked) => checked,
        Err(e) => {
            error!(error = %e, "access check task failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal error");
        }
    };

    match decision {
        Ok(access) => {
            req.extensions_mut().insert(ctx);
            req.extensions_mut().insert(access);
            next.run(req).await
        }
        Err(err) => {
            if let AccessError::Lookup(ref e) = err {
                warn!(path = %req.uri().path(), error = %e, "permission lookup unavailable");
            }
            access_error_response(err)
        }
    }
}
