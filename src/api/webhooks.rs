//! Media-server webhook endpoints. Each endpoint only parses its server's
//! transport quirks (JSON, form payload field, multipart) and hands the
//! resulting JSON to the matching normalizer.

use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::webhook::{self, Normalized, WebhookError};

type WebhookReply = (StatusCode, Json<ApiResponse<String>>);

async fn dispatch(
    state: &Arc<AppState>,
    source: &'static str,
    normalized: Normalized,
) -> Result<WebhookReply, ApiError> {
    match state.shared.webhook_dispatcher.handle(source, normalized).await {
        Ok(report) => {
            let message = format!(
                "accepted: {} submitted, {} queued, {} filtered",
                report.submitted, report.queued, report.filtered
            );
            Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(message))))
        }
        Err(WebhookError::Duplicate(message)) => Err(ApiError::Conflict(message)),
        Err(WebhookError::Other(e)) => Err(ApiError::from(e)),
    }
}

pub async fn emby(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<WebhookReply, ApiError> {
    dispatch(&state, "emby", webhook::emby::normalize(&payload)).await
}

pub async fn tautulli(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<WebhookReply, ApiError> {
    dispatch(&state, "tautulli", webhook::tautulli::normalize(&payload)).await
}

/// Jellyfin posts either JSON or `application/x-www-form-urlencoded` with
/// a `payload` field.
pub async fn jellyfin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<WebhookReply, ApiError> {
    if body.is_empty() {
        return Err(ApiError::validation("request body is empty"));
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let payload: Value = if content_type.contains("application/x-www-form-urlencoded") {
        let form: Vec<(String, String)> = serde_urlencoded_from_bytes(&body)
            .map_err(|e| ApiError::validation(format!("invalid form body: {e}")))?;
        let raw = form
            .into_iter()
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value)
            .ok_or_else(|| ApiError::validation("form data has no 'payload' field"))?;
        serde_json::from_str(&raw)
            .map_err(|e| ApiError::validation(format!("payload field is not JSON: {e}")))?
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::validation(format!("body is not JSON: {e}")))?
    };

    dispatch(&state, "jellyfin", webhook::jellyfin::normalize(&payload)).await
}

/// Plex posts `multipart/form-data` with the JSON in a `payload` part.
pub async fn plex(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<WebhookReply, ApiError> {
    let mut payload: Option<Value> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("payload") {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::validation(format!("unreadable payload part: {e}")))?;
            payload = Some(
                serde_json::from_str(&text)
                    .map_err(|e| ApiError::validation(format!("payload part is not JSON: {e}")))?,
            );
            break;
        }
    }

    let payload = payload.ok_or_else(|| ApiError::validation("multipart has no 'payload' part"))?;
    dispatch(&state, "plex", webhook::plex::normalize(&payload)).await
}

/// Minimal urlencoded pair decoding; the only consumer is the Jellyfin
/// `payload` form field.
fn serde_urlencoded_from_bytes(bytes: &[u8]) -> Result<Vec<(String, String)>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(|c| c.into_owned())
                    .map_err(|e| e.to_string())
            };
            Ok((decode(key)?, decode(value)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_payload_field_decodes() {
        let body = b"payload=%7B%22NotificationType%22%3A%22ItemAdded%22%7D&extra=1";
        let pairs = serde_urlencoded_from_bytes(body).unwrap();
        assert_eq!(pairs[0].0, "payload");
        assert_eq!(pairs[0].1, r#"{"NotificationType":"ItemAdded"}"#);
    }
}
