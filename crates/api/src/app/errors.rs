use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use wacrm_auth::AccessError;
use wacrm_infra::jobs::{EnqueueError, StoreError};

pub fn access_error_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::Unauthenticated { .. } => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized")
        }
        AccessError::Forbidden { required } => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "error": "forbidden",
                "message": "Forbidden",
                "required": required.as_str(),
            })),
        )
            .into_response(),
        AccessError::Lookup(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "Permission check unavailable",
        ),
    }
}

pub fn store_error_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        StoreError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("export {id} already exists"))
        }
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "export store failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", "storage unavailable")
        }
    }
}

pub fn enqueue_error_response(err: EnqueueError) -> axum::response::Response {
    match err {
        EnqueueError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        EnqueueError::Store(e) => store_error_response(e),
        EnqueueError::Transport(e) => {
            tracing::error!(error = %e, "export queue push failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_error", "export queue unavailable")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
