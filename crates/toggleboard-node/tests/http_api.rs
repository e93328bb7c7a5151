//! Integration tests for `GET /api/initial-state` against an in-memory node.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use tower::ServiceExt;

use toggleboard_core::BoardStore;
use toggleboard_core::InMemoryBoardStore;
use toggleboard_core::InitialCount;
use toggleboard_core::SystemTimeProvider;
use toggleboard_node::BoardNode;
use toggleboard_node::NodeConfig;
use toggleboard_node::server::router;

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.board.total_cells = 64;
    config.board.global_cap = 64;
    config.board.initial_count = InitialCount::Zero;
    config
}

async fn start(config: &NodeConfig) -> (BoardNode, Arc<InMemoryBoardStore>) {
    let store = Arc::new(InMemoryBoardStore::new());
    let node = BoardNode::start(config, store.clone(), Arc::new(SystemTimeProvider)).await.unwrap();
    (node, store)
}

fn initial_state_request(client: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/initial-state")
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn initial_state_returns_snapshot() {
    let (node, store) = start(&test_config()).await;
    store.apply_toggle(0, 64).await.unwrap();

    let response = router(node.state()).oneshot(initial_state_request("198.51.100.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["count"], 1);
    assert_eq!(snapshot["frozen_count"], 0);
    // Bit 0 is the most significant bit of the first byte.
    assert!(snapshot["full_state"].as_str().unwrap().starts_with("gA"));
    assert!(snapshot["timestamp"].as_u64().unwrap() > 0);

    node.shutdown().await;
}

#[tokio::test]
async fn repeated_requests_are_eventually_throttled() {
    let mut config = test_config();
    config.admission.max_allowed = 3;
    config.admission.unit_size = 1;
    let (node, _store) = start(&config).await;
    let app = router(node.state());

    let mut throttled_after = None;
    for attempt in 0..200 {
        let response = app.clone().oneshot(initial_state_request("203.0.113.9")).await.unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            throttled_after = Some(attempt);
            break;
        }
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(throttled_after.is_some(), "a flooding client must be rejected");

    // A different client is unaffected.
    let response = app.oneshot(initial_state_request("203.0.113.10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    node.shutdown().await;
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (node, _store) = start(&test_config()).await;
    let request = Request::builder().uri("/api/nothing").body(Body::empty()).unwrap();
    let response = router(node.state()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    node.shutdown().await;
}
