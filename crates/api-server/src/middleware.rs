//! Authentication middleware for API routes.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::ErrorResponse;
use crate::state::AppState;

/// Extract an API key from `Authorization: Bearer <key>` or `X-Api-Key` and
/// check it against `state.api_keys`. The engine has one operator, so there
/// is nothing beyond this to gate on — no roles, no per-route permissions.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    let Some(key) = presented else {
        return unauthorized_response("Missing API key");
    };

    match state.api_keys.authenticate(&key).await {
        Some(_) => next.run(request).await,
        None => unauthorized_response("Invalid or revoked API key"),
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse::new("UNAUTHORIZED", message);
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_unauthorized_response() {
        let response = unauthorized_response("Test message");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
