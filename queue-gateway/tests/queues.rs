use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures::future::join_all;
use health::HealthRegistry;
use http_body_util::BodyExt;
use tower::ServiceExt;

use queue_gateway::broker::memory::{MemoryBroker, Operation};
use queue_gateway::broker::ConsumerIdentity;
use queue_gateway::gateway::QueueGateway;
use queue_gateway::router::router;

const GROUP: &str = "queue-gateway";

fn setup(broker: &MemoryBroker) -> Router {
    let gateway = QueueGateway::new(Arc::new(broker.clone()), ConsumerIdentity::new(GROUP));
    router(gateway, HealthRegistry::new("liveness"), None)
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn post(app: &Router, queue: &str, payload: &'static [u8]) -> StatusCode {
    send(app, Method::POST, &format!("/queues/{queue}"), Body::from(payload))
        .await
        .0
}

async fn get(app: &Router, queue: &str) -> (StatusCode, Vec<u8>) {
    send(app, Method::GET, &format!("/queues/{queue}"), Body::empty()).await
}

#[tokio::test]
async fn posted_message_is_delivered_once() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    assert!(post(&app, "orders", br#"{"order":1}"#).await.is_success());

    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#"{"order":1}"#);

    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn messages_come_back_in_append_order() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    for payload in [&b"one"[..], b"two", b"three"] {
        assert_eq!(post(&app, "orders", payload).await, StatusCode::OK);
    }

    for expected in [&b"one"[..], b"two", b"three"] {
        let (status, body) = get(&app, "orders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected);
    }
    assert_eq!(get(&app, "orders").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fresh_consumer_starts_at_oldest_retained() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    for payload in [&b"expired"[..], b"kept"] {
        post(&app, "orders", payload).await;
    }
    broker.truncate_before("orders", 1);

    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"kept");
    assert_eq!(broker.committed(GROUP, "orders"), Some(2));
}

#[tokio::test]
async fn unknown_queue_is_a_server_error() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    let (status, body) = get(&app, "nonexistent").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body).unwrap();
    assert!(body.starts_with("error locating leader"), "{body}");
}

#[tokio::test]
async fn empty_queue_is_not_found_and_not_committed() {
    let broker = MemoryBroker::new();
    broker.create_queue("orders");
    let app = setup(&broker);

    for _ in 0..3 {
        assert_eq!(get(&app, "orders").await.0, StatusCode::NOT_FOUND);
    }
    assert_eq!(broker.commit_writes(), 0);
}

#[tokio::test]
async fn failed_commit_redelivers_on_next_get() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);
    post(&app, "orders", b"payload").await;

    broker.fail_next(Operation::Commit, "not coordinator");
    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"error committing offset: not coordinator");

    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"payload");
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn queues_are_independent() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    post(&app, "orders", b"order").await;
    post(&app, "payments", b"payment").await;

    let results = join_all([get(&app, "payments"), get(&app, "orders")]).await;
    assert_eq!(results[0], (StatusCode::OK, b"payment".to_vec()));
    assert_eq!(results[1], (StatusCode::OK, b"order".to_vec()));
}

#[tokio::test]
async fn oversized_body_is_a_body_read_error() {
    let broker = MemoryBroker::new();
    let app = setup(&broker);

    let payload = vec![b'x'; 3 * 1024 * 1024];
    let (status, body) = send(&app, Method::POST, "/queues/orders", Body::from(payload)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body).unwrap();
    assert!(body.starts_with("error reading message:"), "{body}");

    // Nothing reached the broker, so the queue was never created
    let (status, body) = get(&app, "orders").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with(b"error locating leader"));
}
