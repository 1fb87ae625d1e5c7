//! Exercises the REST routes through a real router against an in-memory store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mqscope_api::{IncomingMessage, PublishError, QoS, RetainedPublisher};
use mqscope_api_server::{AppState, router};
use mqscope_engine::{BulkClear, BulkConfig, MessageStore};

struct AcceptAll;

impl RetainedPublisher for AcceptAll {
    fn publish_retained(
        &self,
        _topic: &str,
        _payload: Vec<u8>,
        _qos: QoS,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

fn test_app(topics: &[(&str, &str)]) -> (axum::Router, Arc<MessageStore>) {
    let store = Arc::new(MessageStore::default());
    for (topic, payload) in topics {
        store.ingest(IncomingMessage::new(*topic, *payload).at(1_700_000_000_000));
    }
    let bulk = Arc::new(BulkClear::new(
        store.clone(),
        Arc::new(AcceptAll),
        BulkConfig { max_topics: 2, parallelism: 2 },
    ));
    let state = AppState {
        store: store.clone(),
        bulk,
        shutdown: CancellationToken::new(),
    };
    (router(state), store)
}

async fn call(app: &axum::Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            req = req.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_list_topics_and_stats() {
    let (app, _) = test_app(&[("b/x", "1"), ("a/y", "22")]);

    let (status, json) = call(&app, Method::GET, "/api/topics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!(["a/y", "b/x"]));

    let (status, json) = call(&app, Method::GET, "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["topics"], 2);
    assert_eq!(json["messages"], 2);
    assert_eq!(json["bytes"], 3);
}

#[tokio::test]
async fn test_topic_messages_with_limit() {
    let (app, _) = test_app(&[("home/temp", "20"), ("home/temp", "21"), ("home/temp", "22")]);

    let (status, json) = call(&app, Method::GET, "/api/topics/home/temp?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["topic"], "home/temp");
    assert_eq!(json["byte_usage"], 6);
    assert_eq!(json["max_bytes"], 1024 * 1024);
    let payloads: Vec<&str> = json["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["payload"].as_str().unwrap())
        .collect();
    assert_eq!(payloads, vec!["21", "22"]);

    let (status, _) = call(&app, Method::GET, "/api/topics/home/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_by_id() {
    let (app, store) = test_app(&[("a", "x")]);
    let id = store.messages("a").last().unwrap().id;

    let (status, json) = call(&app, Method::GET, &format!("/api/message/{id}?topic=a"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payload"], "x");

    let (status, _) = call(&app, Method::GET, &format!("/api/message/{id}?topic=b"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_topic_is_idempotent() {
    let (app, store) = test_app(&[("a/b", "x")]);

    let (status, json) = call(&app, Method::DELETE, "/api/topics/a/b", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleared"], true);
    assert!(store.list_topics().is_empty());

    let (status, json) = call(&app, Method::DELETE, "/api/topics/a/b", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleared"], false);
}

#[tokio::test]
async fn test_tree_filter() {
    let (app, _) = test_app(&[
        ("lighting/kitchen/ceiling", "on"),
        ("lighting/livingroom/floor", "off"),
    ]);

    let (status, json) = call(
        &app,
        Method::POST,
        "/api/tree/filter",
        Some(serde_json::json!({ "filter": "kitchen" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let lighting = &json[0];
    assert_eq!(lighting["name"], "lighting");
    assert_eq!(lighting["total_count"], 2);
    let children = lighting["children"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["name"], "kitchen");

    // Reads leave the shared filter alone, whatever the query string says.
    let (_, json) = call(&app, Method::GET, "/api/tree?filter=", None).await;
    assert_eq!(json[0]["children"].as_array().unwrap().len(), 1);

    let (_, json) = call(&app, Method::POST, "/api/tree/filter", Some(serde_json::json!({}))).await;
    assert_eq!(json[0]["children"].as_array().unwrap().len(), 2);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/tree/expanded",
        Some(serde_json::json!({ "path": "lighting", "expanded": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, json) = call(&app, Method::GET, "/api/tree", None).await;
    assert_eq!(json[0]["expanded"], true);
}

#[tokio::test]
async fn test_bulk_clear_requires_confirmation_over_limit() {
    let (app, store) = test_app(&[("s/1", "a"), ("s/2", "b"), ("s/3", "c")]);

    let (status, json) = call(
        &app,
        Method::POST,
        "/api/bulk-clear",
        Some(serde_json::json!({ "start": "s" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["found"], 3);
    assert_eq!(json["limit"], 2);
    assert_eq!(store.list_topics().len(), 3);

    let (status, json) = call(
        &app,
        Method::POST,
        "/api/bulk-clear",
        Some(serde_json::json!({ "start": "s", "confirmed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["succeeded"].as_array().unwrap().len(), 3);
    assert_eq!(json["aborted"], false);
    assert!(store.list_topics().is_empty());

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/bulk-clear",
        Some(serde_json::json!({ "start": "s/#/x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
