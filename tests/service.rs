use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cacher::metrics::Metrics;
use cacher::service::{self, AppState};
use cacher_core::{Readiness, Store, WatchDispatcher};
use http_body_util::BodyExt;
use prometheus_client::registry::Registry;
use serde_json::Value;
use tokio::sync::watch as shutdown_watch;
use tower::ServiceExt;

fn test_state() -> AppState {
    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::new(&mut registry));
    let (_tx, rx) = shutdown_watch::channel(());
    AppState {
        store: Arc::new(Store::new()),
        watch: WatchDispatcher::new(),
        readiness: Arc::new(Readiness::new()),
        metrics,
        shutdown: rx,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn by_id_returns_not_ready_before_ingest_completes() {
    let state = test_state();
    let router = service::router(state);

    let req = Request::builder()
        .uri("/v1/hardware/by-id/11111111-1111-1111-1111-111111111111")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn by_id_returns_empty_payload_once_ready_and_missing() {
    let state = test_state();
    state.readiness.set_ready();
    let router = service::router(state);

    let req = Request::builder()
        .uri("/v1/hardware/by-id/11111111-1111-1111-1111-111111111111")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["json"], "");
}

#[tokio::test]
async fn push_then_by_id_round_trips_the_payload() {
    let state = test_state();
    state.readiness.set_ready();
    let router = service::router(state);

    let payload = serde_json::json!({
        "id": "11111111-1111-1111-1111-111111111111",
        "state": "provisioning",
        "ip_addresses": [{"address": "10.0.0.1"}],
    })
    .to_string();

    let push = Request::builder()
        .method("POST")
        .uri("/v1/push")
        .body(Body::from(payload.clone()))
        .unwrap();
    let resp = router.clone().oneshot(push).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let get = Request::builder()
        .uri("/v1/hardware/by-id/11111111-1111-1111-1111-111111111111")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(get).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["json"], payload);
}

#[tokio::test]
async fn healthz_reflects_readiness() {
    let state = test_state();
    let router = service::router(state.clone());

    let req = Request::builder().uri("/v1/healthz").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["status"], "NOT_READY");

    state.readiness.set_ready();
    let req = Request::builder().uri("/v1/healthz").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["status"], "SERVING");
}

#[tokio::test]
async fn by_ip_rejects_unparseable_address() {
    let state = test_state();
    state.readiness.set_ready();
    let router = service::router(state);

    let req = Request::builder()
        .uri("/v1/hardware/by-ip/not-an-ip")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
