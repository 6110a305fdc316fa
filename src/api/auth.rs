//! Bearer-token authentication for the configuration API.

use crate::error::PipelineError;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::AppState;

/// Error surface for every API handler. Maps the pipeline taxonomy onto
/// HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    Validation(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(msg) => ApiError::Validation(msg),
            PipelineError::ConfigNotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "invalid or missing token".to_string())
            }
            ApiError::Forbidden(scope) => (
                StatusCode::FORBIDDEN,
                format!("token lacks required scope '{scope}'"),
            ),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                warn!("API internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Checks the `Authorization: Bearer <token>` header against the configured
/// token. Handlers additionally assert a scope with [`require_scope`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !token_matches(presented, &state.api_token) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Ensures the configured token carries a scope. Scopes are static per
/// deployment; the check still keeps handlers honest about what they need.
pub fn require_scope(state: &AppState, scope: &str) -> Result<(), ApiError> {
    if state.api_scopes.iter().any(|s| s == scope) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(scope.to_string()))
    }
}

/// Comparing fixed-length digests instead of the raw strings keeps the
/// comparison time independent of where the tokens first differ.
fn token_matches(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a == b
}
