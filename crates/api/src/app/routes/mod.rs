use axum::{
    routing::{get, post},
    Router,
};

pub mod exports;
pub mod system;

/// Router for all endpoints. Authorization is applied by the gate layer.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/v1/health", get(system::health))
        .route("/v1/whoami", get(system::whoami))
        .route(
            "/v1/reports/exports",
            get(exports::list_exports).post(exports::create_export),
        )
        .route("/v1/reports/exports/:id", get(exports::get_export))
        .route("/v1/reports/exports/:id/download", get(exports::download_export))
        .route("/v1/contacts/export", post(exports::create_contacts_export))
}
