mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use pwa_cache::cache::PartitionKind;
use pwa_cache::infra::http::{MESSAGE_PATH, ProxyState, SOURCE_HEADER, STATUS_PATH, build_router};
use serde_json::Value;
use tower::ServiceExt;

use common::{Harness, config, url};

fn router(harness: &Harness) -> Router {
    build_router(ProxyState {
        manager: harness.manager.clone(),
        body_limit: 64 * 1024,
    })
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router.oneshot(request).await.expect("router should respond");
    let status = response.status();
    let source = response
        .headers()
        .get(SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec();
    (status, source, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

#[tokio::test]
async fn cached_asset_is_served_with_source_header() {
    let harness = Harness::activated(config("1.0.0")).await;
    harness
        .seed(PartitionKind::Static, &url("/icons/icon-192x192.png"), "png")
        .await;
    harness.fetcher.set_offline(true);

    let (status, source, body) = send(router(&harness), get("/icons/icon-192x192.png")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(source.as_deref(), Some("cache"));
    assert_eq!(body, b"png");
}

#[tokio::test]
async fn offline_navigation_gets_offline_document() {
    let harness = Harness::activated(config("1.0.0")).await;
    harness
        .seed(PartitionKind::Static, &url("/offline.html"), "offline")
        .await;
    harness.fetcher.set_offline(true);

    let request = Request::builder()
        .uri("/admin")
        .header("sec-fetch-dest", "document")
        .body(Body::empty())
        .expect("request should build");
    let (status, source, body) = send(router(&harness), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(source.as_deref(), Some("offline"));
    assert_eq!(body, b"offline");
}

#[tokio::test]
async fn unreachable_upstream_without_cache_is_bad_gateway() {
    let harness = Harness::activated(config("1.0.0")).await;
    harness.fetcher.set_offline(true);

    let (status, source, _) = send(router(&harness), get("/bookings")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(source, None);
}

#[tokio::test]
async fn network_response_is_forwarded_and_cached() {
    let harness = Harness::activated(config("1.0.0")).await;
    harness.fetcher.respond(&url("/bookings?day=tue"), 200, "tuesday");

    let (status, source, body) = send(router(&harness), get("/bookings?day=tue")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(source.as_deref(), Some("network"));
    assert_eq!(body, b"tuesday");
    assert_eq!(
        harness
            .cached_body(PartitionKind::Dynamic, &url("/bookings?day=tue"))
            .await
            .as_deref(),
        Some("tuesday")
    );
}

#[tokio::test]
async fn status_endpoint_reports_state_and_partitions() {
    let harness = Harness::activated(config("1.4.0")).await;

    let (status, _, body) = send(router(&harness), get(STATUS_PATH)).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(json["version"], "1.4.0");
    assert_eq!(json["state"], "activated");
    assert_eq!(json["partitions"].as_array().map(Vec::len), Some(3));
    assert_eq!(harness.fetcher.call_count(), 0);
}

#[tokio::test]
async fn message_endpoint_handles_worker_messages() {
    let harness = Harness::new(config("1.4.0"));
    harness.manager.install().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(MESSAGE_PATH)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"type":"SKIP_WAITING"}"#))
        .expect("request should build");
    let (status, _, body) = send(router(&harness), request).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(json["type"], "state");
    assert_eq!(json["state"], "activated");
}

#[tokio::test]
async fn unknown_message_is_rejected() {
    let harness = Harness::activated(config("1.0.0")).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(MESSAGE_PATH)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"type":"SELF_DESTRUCT"}"#))
        .expect("request should build");
    let (status, _, _) = send(router(&harness), request).await;

    assert!(status.is_client_error());
}
