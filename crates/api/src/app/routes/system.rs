use axum::{extract::Extension, response::IntoResponse, Json};

use crate::context::{require_auth, RequestContext};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> axum::response::Response {
    let auth = match require_auth(&ctx) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };

    Json(serde_json::json!({
        "user_id": auth.user_id.to_string(),
        "workspace_id": auth.workspace_id.to_string(),
    }))
    .into_response()
}
