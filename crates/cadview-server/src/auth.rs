//! Authentication middleware for admin routes
//!
//! Mutating routes require `Authorization: Bearer <token>` matching the
//! configured admin token. Without a configured token every request passes
//! (development mode).

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

/// Error response for authentication failures
#[derive(Serialize)]
struct AuthError {
    error: String,
    code: &'static str,
}

fn unauthorized(error: &str, code: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            error: error.to_string(),
            code,
        }),
    )
        .into_response()
}

/// Compare without short-circuiting on the first differing byte
fn token_matches(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Admin authentication middleware
pub async fn require_admin(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.server.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some(token) => token.trim(),
            None => {
                warn!("Invalid authorization header format");
                return unauthorized(
                    "Invalid authorization header format. Use: Bearer <token>",
                    "INVALID_AUTH_FORMAT",
                );
            }
        },
        None => {
            debug!(path = %request.uri().path(), "Missing authorization header");
            return unauthorized(
                "Authorization required. Include header: Authorization: Bearer <token>",
                "AUTH_REQUIRED",
            );
        }
    };

    if !token_matches(token, expected) {
        warn!(path = %request.uri().path(), "Invalid admin token");
        return unauthorized("Invalid admin token", "INVALID_TOKEN");
    }

    next.run(request).await
}
