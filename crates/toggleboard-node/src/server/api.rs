use std::net::SocketAddr;

use axum::Json;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use tracing::debug;
use tracing::warn;

use toggleboard_fanout::capture_snapshot;

use super::AppState;

/// `GET /api/initial-state`: the current board snapshot.
///
/// Counts as one gated attempt; throttled callers get 429.
pub async fn initial_state(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let identity = state.classifier.classify(&headers, peer.map(|ConnectInfo(addr)| addr));
    if let Err(err) = state.service.gate(&identity.key) {
        debug!(error = %err, "initial state request throttled");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    match capture_snapshot(state.service.store().as_ref(), state.service.clock().as_ref()).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to read board for initial state");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
