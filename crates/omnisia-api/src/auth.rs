//! Bearer-token authentication for the protected API routes.
//!
//! The token lives in `<data_dir>/api_token`; it is generated on first start
//! and must be sent as `Authorization: Bearer <token>` on protected routes.

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::error::ApiError;
use crate::state::AppState;

/// File name of the token inside the data directory.
pub const TOKEN_FILE_NAME: &str = "api_token";

/// Fresh token: 16 random bytes, hex encoded.
pub fn generate_token() -> String {
    hex::encode(rand::rng().random::<[u8; 16]>())
}

fn read_token(path: &Path) -> Option<String> {
    let token = std::fs::read_to_string(path).ok()?.trim().to_string();
    (!token.is_empty()).then_some(token)
}

fn write_token(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Reuse the token stored at `path`, or create and store a new one.
///
/// A token that cannot be written is still used for this run.
pub fn load_or_generate_token(path: &Path) -> String {
    if let Some(token) = read_token(path) {
        tracing::info!(path = %path.display(), "Using existing API token");
        return token;
    }

    let token = generate_token();
    match write_token(path, &token) {
        Ok(()) => tracing::info!(path = %path.display(), "Generated new API token"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not persist API token"),
    }
    token
}

/// Bearer-token gate for protected routes.
///
/// Responds 401 if the header is missing, malformed, or carries the wrong
/// token. An empty configured token rejects every request.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response();
    };
    let Ok(value) = value.to_str() else {
        return ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
            .into_response();
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if !state.api_token.is_empty() && token == state.api_token => {
            next.run(req).await
        }
        _ => ApiError::Unauthorized("Invalid bearer token".to_string()).into_response(),
    }
}
