//! HTTP and WebSocket surface.
//!
//! - `GET /api/initial-state`: current snapshot for a newly loaded page
//! - `GET /ws`: viewer socket receiving batched changes and snapshots, and
//!   accepting `toggle_bit` and `unsubscribe` events

mod api;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use snafu::ResultExt;
use snafu::Snafu;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use toggleboard_admission::ConnectionClassifier;
use toggleboard_fanout::ViewerHub;

use crate::service::ToggleService;

pub use api::initial_state;
pub use ws::ClientMessage;
pub use ws::ToggleBitRequest;
pub use ws::ws_handler;

/// Errors from the HTTP listener.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    /// The listener could not be bound.
    #[snafu(display("failed to bind {addr}: {source}"))]
    Bind { addr: SocketAddr, source: std::io::Error },

    /// The server stopped with an I/O error.
    #[snafu(display("server error: {source}"))]
    Serve { source: std::io::Error },
}

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Toggle path and admission gate.
    pub service: ToggleService,
    /// Viewer broadcast groups.
    pub hub: Arc<ViewerHub>,
    /// Client key derivation.
    pub classifier: Arc<ConnectionClassifier>,
    /// Fires when the node shuts down; open sockets close on it.
    pub shutdown: CancellationToken,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/initial-state", get(initial_state))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind the listener for `addr`.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.context(BindSnafu { addr })
}

/// Serve `state` on `listener` until `state.shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context(ServeSnafu)
}
