//! External API authentication.
//!
//! The key is compared in constant time against the stored value; failed
//! attempts land in the `external_api_log` table with the caller address.

use axum::{
    extract::{ConnectInfo, Extension, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::{ApiError, AppState};

#[derive(Deserialize)]
pub struct AuthQuery {
    pub api_key: Option<String>,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthQuery>,
    addr: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let addr = addr.map_or_else(|| "unknown".to_string(), |a| a.0.0.ip().to_string());
    let expected = state.shared.config_store.get("externalApiKey", "").await;
    if expected.is_empty() {
        // No key configured means the control API is closed.
        log_rejected(&state, &addr, request.uri().path(), "api key not configured").await;
        return Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response());
    }

    let presented = query.api_key.or_else(|| {
        headers
            .get("X-Api-Key")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    });

    match presented {
        Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            log_rejected(&state, &addr, request.uri().path(), "invalid api key").await;
            Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response())
        }
        None => {
            log_rejected(&state, &addr, request.uri().path(), "missing api key").await;
            Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response())
        }
    }
}

async fn log_rejected(state: &Arc<AppState>, addr: &str, endpoint: &str, reason: &str) {
    if let Err(e) = state
        .shared
        .store
        .add_api_log(addr, endpoint, 401, Some(reason))
        .await
    {
        warn!("Failed to write external api log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_rejects_length_and_content_mismatch() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secres"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"x"));
    }
}
