//! HTTP request handlers
//!
//! Implementation of the HTTP endpoints for serve mode.

use crate::{
    server::app::AppState,
    types::{ErrorResponse, PingResponse, PotRequest},
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Token acquisition endpoint
///
/// POST /get_pot
///
/// Runs the provider's strategy chain for the request and returns the first
/// result, or 503 when no strategy can serve it.
pub async fn get_pot(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let request: PotRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "failed to deserialize token request");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse::with_context(
                    format!("Invalid JSON: {}", e),
                    "json_deserialization",
                )),
            )
                .into_response();
        }
    };

    tracing::debug!(?request, "received token request");

    match state.provider.get_po_token(&request).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::with_context(
                "No token strategy could serve the request",
                "token_acquisition",
            )),
        )
            .into_response(),
    }
}

/// Ping endpoint for health checks
///
/// GET /ping
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(PingResponse::new(uptime, env!("CARGO_PKG_VERSION")))
}

/// Cache invalidation endpoint
///
/// POST /invalidate_caches
pub async fn invalidate_caches(State(state): State<AppState>) -> StatusCode {
    tracing::info!("invalidating provider cache");
    state.provider.clear_cache().await;
    StatusCode::NO_CONTENT
}
