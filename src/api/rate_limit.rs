//! Rate-limit status: a one-shot JSON snapshot, or an SSE stream emitting
//! the same object every second when `?stream=true`.

use axum::{
    Json,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
};
use futures::stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use super::{ApiError, ApiResponse, AppState};

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub stream: bool,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError> {
    if !query.stream {
        let snapshot = state.shared.rate_limiter.status().await?;
        return Ok(Json(ApiResponse::success(snapshot)).into_response());
    }

    let shared = state.shared.clone();
    let stream = stream::unfold(shared, |shared| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let event = match shared.rate_limiter.status().await {
            Ok(snapshot) => Event::default()
                .json_data(&snapshot)
                .unwrap_or_else(|_| Event::default().comment("serialization error")),
            Err(e) => Event::default().comment(format!("status error: {e}")),
        };
        Some((Ok::<Event, Infallible>(event), shared))
    });

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}
