//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend wiring (job store, permissions, queue, audit)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{http::StatusCode, response::Response, Extension, Router};
use tower::ServiceBuilder;

use wacrm_auth::{AccessGate, Hs256JwtValidator, PermissionLookup};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, InMemoryBackends};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Every request passes `auth_middleware` then `access_gate_middleware`;
/// public routes are simply those the gate resolves to no permission.
pub fn build_app(services: AppServices, jwt_secret: &str) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let lookup: Arc<dyn PermissionLookup> = services.permissions.clone();
    let gate_state = middleware::GateState {
        gate: Arc::new(AccessGate::new(lookup)),
    };

    routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            gate_state,
            middleware::access_gate_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ))
        .layer(ServiceBuilder::new())
}

/// Run blocking collaborator calls off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal error")
    })
}
