//! Management surface exercised through the router.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use feed_relay::config::RelayConfig;
use feed_relay::http::build_router;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

fn app(config: RelayConfig) -> Router {
    let (relay, _) = common::relay_with_clock(config);
    build_router(&relay.config.server, relay.app_state())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn admin_get(uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app(common::test_config());
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_list_and_deactivate() {
    let app = app(common::test_config());

    let (status, created) = send(
        &app,
        post_json(
            "/webhooks",
            json!({ "url": "https://hooks.example.com/relay", "events": ["launch.imminent"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["isActive"], true);
    let secret = created["secret"].as_str().unwrap().to_string();
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = send(&app, get("/webhooks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert!(listed[0].get("secret").is_none());
    assert!(!listed.to_string().contains(&secret));

    let (status, _) = send(&app, delete(&format!("/webhooks/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, delete(&format!("/webhooks/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, view) = send(&app, get(&format!("/webhooks/{id}"))).await;
    assert_eq!(view["isActive"], false);
}

#[tokio::test]
async fn test_register_validation_is_400() {
    let app = app(common::test_config());
    let cases = [
        json!({ "url": "ftp://hooks.example.com", "events": ["news.published"] }),
        json!({ "url": "not a url", "events": ["news.published"] }),
        json!({ "url": "https://hooks.example.com", "events": [] }),
        json!({ "url": "https://hooks.example.com", "events": ["launch.exploded"] }),
    ];

    for case in cases {
        let (status, body) = send(&app, post_json("/webhooks", case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_unknown_subscription_is_404() {
    let app = app(common::test_config());
    let id = uuid::Uuid::new_v4();
    let (status, _) = send(&app, delete(&format!("/webhooks/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, post_json(&format!("/webhooks/{id}/test"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_test_ping_reaches_subscriber() {
    let app = app(common::test_config());
    let hook = common::subscriber(200).await;

    let (_, created) = send(
        &app,
        post_json("/webhooks", json!({ "url": hook.uri(), "events": ["market.alert"] })),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, summary) = send(&app, post_json(&format!("/webhooks/{id}/test"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["eventType"], "webhook.test");

    let requests = hook.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers.get("x-webhook-event").unwrap(), "webhook.test");
}

#[tokio::test]
async fn test_admin_requires_bearer_key() {
    let app = app(common::test_config());

    let (status, _) = send(&app, get("/admin/status")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, admin_get("/admin/status", "wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, admin_get("/admin/status", common::ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["subscriptions"]["total"], 0);

    let (status, body) = send(&app, admin_get("/admin/circuits", common::ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = send(&app, admin_get("/admin/cache", common::ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_admin_disabled_is_not_mounted() {
    let mut config = common::test_config();
    config.admin.enabled = false;
    let app = app(config);

    let (status, _) = send(&app, admin_get("/admin/status", common::ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
