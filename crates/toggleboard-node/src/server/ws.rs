use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use toggleboard_admission::ClientIdentity;
use toggleboard_core::ValidationError;
use toggleboard_fanout::ViewerSubscription;

use super::AppState;
use crate::service::ToggleError;

/// Events a viewer may send, framed as `{"event": name, "data": payload}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Flip one cell.
    ToggleBit(ToggleBitRequest),
    /// Stop receiving full-state snapshots.
    Unsubscribe,
}

/// Payload of `toggle_bit`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToggleBitRequest {
    /// Requested cell. Browsers send plain JSON numbers.
    pub index: serde_json::Number,
}

impl ToggleBitRequest {
    /// The index as a signed integer; fractional values are truncated.
    pub fn index(&self) -> Result<i64, ValidationError> {
        self.index
            .as_i64()
            .or_else(|| self.index.as_f64().filter(|value| value.is_finite()).map(|value| value as i64))
            .ok_or_else(|| ValidationError::MalformedPayload {
                reason: format!("index {} is not an integer", self.index),
            })
    }
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|err| ValidationError::MalformedPayload { reason: err.to_string() })
    }
}

/// `GET /ws`: upgrade to a viewer socket.
///
/// The upgrade request is one gated attempt (400 when throttled) and the
/// opened socket is gated again before it joins the hub.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let identity = state.classifier.classify(&headers, peer.map(|ConnectInfo(addr)| addr));
    if let Err(err) = state.service.gate(&identity.key) {
        debug!(error = %err, "socket upgrade throttled");
        return (StatusCode::BAD_REQUEST, "rate limited").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

enum Flow {
    Continue,
    Close,
}

async fn handle_socket(mut socket: WebSocket, state: AppState, identity: ClientIdentity) {
    if state.service.gate(&identity.key).is_err() {
        info!(client_key = %identity.key, "rejecting connection from suspected abuse address");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let mut viewer = state.hub.join(identity.is_ipv6);
    debug!(client_key = %identity.key, is_ipv6 = identity.is_ipv6, viewers = state.hub.viewer_count(), "viewer joined");

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = viewer.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Flow::Close = handle_client_message(&state, &identity, &mut viewer, &text).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    debug!(client_key = %identity.key, "viewer left");
}

async fn handle_client_message(
    state: &AppState,
    identity: &ClientIdentity,
    viewer: &mut ViewerSubscription,
    text: &str,
) -> Flow {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(client_key = %identity.key, error = %err, "ignoring malformed client event");
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::Unsubscribe => {
            viewer.exclude_from_snapshots();
            Flow::Continue
        }
        ClientMessage::ToggleBit(request) => {
            let index = match request.index() {
                Ok(index) => index,
                Err(err) => {
                    warn!(client_key = %identity.key, error = %err, "ignoring malformed toggle");
                    return Flow::Continue;
                }
            };
            match state.service.toggle(&identity.key, identity.is_ipv6, index).await {
                Ok(_) => Flow::Continue,
                Err(ToggleError::Throttled { score, .. }) => {
                    info!(client_key = %identity.key, score, "rejecting toggle from suspected abuse address");
                    Flow::Close
                }
                Err(ToggleError::InvalidIndex { source }) => {
                    warn!(client_key = %identity.key, error = %source, "attempted to toggle bad index");
                    Flow::Continue
                }
                Err(ToggleError::Store { source }) => {
                    warn!(client_key = %identity.key, index, error = %source, "unable to toggle bit");
                    Flow::Continue
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toggle_bit() {
        let message = ClientMessage::parse(r#"{"event":"toggle_bit","data":{"index":42}}"#).unwrap();
        let ClientMessage::ToggleBit(request) = message else {
            panic!("expected toggle_bit");
        };
        assert_eq!(request.index().unwrap(), 42);
    }

    #[test]
    fn float_index_is_truncated() {
        let message = ClientMessage::parse(r#"{"event":"toggle_bit","data":{"index":7.0}}"#).unwrap();
        let ClientMessage::ToggleBit(request) = message else {
            panic!("expected toggle_bit");
        };
        assert_eq!(request.index().unwrap(), 7);
    }

    #[test]
    fn parses_unsubscribe_without_data() {
        assert_eq!(ClientMessage::parse(r#"{"event":"unsubscribe"}"#).unwrap(), ClientMessage::Unsubscribe);
    }

    #[test]
    fn rejects_unknown_events() {
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"flip_everything"}"#),
            Err(ValidationError::MalformedPayload { .. })
        ));
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"event":"toggle_bit","data":{"index":"3"}}"#).is_err());
    }
}
