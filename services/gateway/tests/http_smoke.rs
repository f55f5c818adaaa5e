mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::read_json;
use gateway::app::{AppState, build_router};
use http_helpers::raw_request;
use postbox_queue::{PathResolver, QueueConfig, QueueHub, QueueStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
const LONG_TIMEOUT: Duration = Duration::from_secs(5);

fn app_with(
    root: &Path,
    config: QueueConfig,
    connection_timeout: Duration,
) -> axum::routing::RouterIntoService<Body, ()> {
    let store = QueueStore::new(PathResolver::new(root));
    let state = AppState {
        hub: Arc::new(QueueHub::new(store, config)),
        connection_timeout,
    };
    build_router("/mq", state).into_service()
}

#[tokio::test]
async fn put_get_delete_round_trip() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), SHORT_TIMEOUT);

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "hello queue"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/get/orders/sig", Body::empty()))
        .await
        .expect("get");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "hello queue");
    let message_id = payload["messageId"].as_str().expect("messageId").to_string();

    let uri = format!("/mq/acme/delete/orders/{message_id}/sig");
    let response = app
        .clone()
        .oneshot(raw_request("DELETE", &uri, Body::empty()))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::OK);

    // Drained queue: the connection timeout elapses with nothing delivered.
    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/get/orders/sig", Body::empty()))
        .await
        .expect("get");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn take_returns_and_removes_the_message() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), SHORT_TIMEOUT);

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "only one"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/take/orders/sig", Body::empty()))
        .await
        .expect("take");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "only one");

    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/take/orders/sig", Body::empty()))
        .await
        .expect("take again");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn oversized_put_is_rejected_with_message() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(
        root.path(),
        QueueConfig {
            max_message_bytes: 4,
            ..QueueConfig::default()
        },
        SHORT_TIMEOUT,
    );

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "much too large"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json(response).await;
    assert_eq!(payload["code"], "message_too_large");

    // Nothing persisted: the next read times out empty.
    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/get/orders/sig", Body::empty()))
        .await
        .expect("get");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn queue_full_is_rejected_with_message() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(
        root.path(),
        QueueConfig {
            max_queue_len: 0,
            ..QueueConfig::default()
        },
        SHORT_TIMEOUT,
    );

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "first"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "second"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json(response).await;
    assert_eq!(payload["code"], "queue_full");
    assert_eq!(payload["message"], "queue size exceeded");
}

#[tokio::test]
async fn delete_of_missing_or_malformed_id_answers_500() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), SHORT_TIMEOUT);

    let response = app
        .clone()
        .oneshot(raw_request(
            "DELETE",
            "/mq/acme/delete/orders/1700000000000/sig",
            Body::empty(),
        ))
        .await
        .expect("delete missing");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json(response).await;
    assert_eq!(payload["code"], "internal");

    let response = app
        .clone()
        .oneshot(raw_request(
            "DELETE",
            "/mq/acme/delete/orders/not-an-id/sig",
            Body::empty(),
        ))
        .await
        .expect("delete malformed");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn long_poll_get_is_completed_by_a_later_put() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), LONG_TIMEOUT);

    let waiter = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(raw_request("GET", "/mq/acme/get/orders/sig", Body::empty()))
                .await
                .expect("get")
        })
    };
    // Let the read park before the queue becomes nonempty.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "wake up"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = waiter.await.expect("join");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "wake up");

    // The hand-off never deletes: the entry is still there for a take.
    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/acme/take/orders/sig", Body::empty()))
        .await
        .expect("take");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn domains_partition_queues() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), SHORT_TIMEOUT);

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/orders", "for acme"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(raw_request("GET", "/mq/globex/get/orders/sig", Body::empty()))
        .await
        .expect("get other domain");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn reserved_queue_names_are_served() {
    let root = tempfile::tempdir().expect("tempdir");
    let app = app_with(root.path(), QueueConfig::default(), SHORT_TIMEOUT);

    let response = app
        .clone()
        .oneshot(raw_request("PUT", "/mq/acme/put/did:ssi:demo", "encoded"))
        .await
        .expect("put");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(raw_request(
            "GET",
            "/mq/acme/take/did:ssi:demo/sig",
            Body::empty(),
        ))
        .await
        .expect("take");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["message"], "encoded");
}
