//! HTTP surface, exercised through the router without a socket

use super::fixtures::{test_config, wait_terminal, FakeBackend};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use infer_dispatch::server::{create_router, AppState};
use infer_dispatch::Dispatcher;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "----dispatch-test-boundary";

fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn predict_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict_async")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, filename, data)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn call(dispatcher: &Arc<Dispatcher>, request: Request<Body>) -> (StatusCode, Value) {
    let app = create_router(AppState::new(Arc::clone(dispatcher)));
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn dispatcher(queue_capacity: usize) -> Arc<Dispatcher> {
    Arc::new(
        Dispatcher::with_backend(
            test_config().with_queue_capacity(queue_capacity),
            Arc::new(FakeBackend::ok()),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_health() {
    let d = dispatcher(4);
    let (status, body) = call(&d, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"status": "healthy"}));
}

#[tokio::test]
async fn test_predict_then_poll() {
    let d = dispatcher(4);
    d.start();

    let (status, body) = call(&d, predict_request("image", "cat.jpg", b"cat pixels")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["queue_size"], 1);
    let request_id = body["request_id"].as_str().unwrap().to_string();
    assert_eq!(body["status_url"], format!("/result/{request_id}"));

    wait_terminal(&d, &request_id).await;
    let (status, record) = call(&d, get(&format!("/result/{request_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "completed");
    assert_eq!(record["filename"], "cat.jpg");
    assert_eq!(record["from_cache"], false);
    assert!(record["result"]["predictions"].is_array());
    assert!(record["replica_used"].is_string());

    // same bytes again: answered inline
    let (status, body) = call(&d, predict_request("image", "cat.jpg", b"cat pixels")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["from_cache"], true);
    assert_eq!(body["result"], record["result"]);

    let (_, listing) = call(&d, get("/results")).await;
    assert_eq!(listing["total_results"], 2);
    assert_eq!(listing["results"][0], request_id.as_str());
    d.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_returns_503() {
    let d = dispatcher(1);
    let (status, _) = call(&d, predict_request("image", "a.jpg", b"a")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = call(&d, predict_request("image", "b.jpg", b"b")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["error"], "Queue is full");
    assert_eq!(body["queue_size"], 1);
    assert_eq!(body["capacity"], 1);
}

#[tokio::test]
async fn test_upload_after_shutdown_returns_503() {
    let d = dispatcher(4);
    d.start();
    d.shutdown().await;

    let (status, body) = call(&d, predict_request("image", "a.jpg", b"a")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["error"], "Dispatcher is shutting down");
}

#[tokio::test]
async fn test_bad_uploads_return_400() {
    let d = dispatcher(4);

    let (status, body) = call(&d, predict_request("file", "a.jpg", b"a")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image provided");

    let (status, body) = call(&d, predict_request("image", "", b"a")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image selected");

    let (status, body) = call(&d, predict_request("image", "a.jpg", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let not_multipart = Request::builder()
        .method("POST")
        .uri("/predict_async")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = call(&d, not_multipart).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    assert_eq!(d.metrics().counters().total_requests, 0);
}

#[tokio::test]
async fn test_unknown_request_id_is_404() {
    let d = dispatcher(4);
    let (status, body) = call(&d, get("/result/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Request ID not found");
}

#[tokio::test]
async fn test_status_report_shape() {
    let d = dispatcher(4);
    call(&d, predict_request("image", "a.jpg", b"a")).await;

    let (status, body) = call(&d, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 1);
    assert_eq!(body["queue_size"], 1);
    assert_eq!(body["queue_metrics"]["queue_capacity"], 4);
    assert_eq!(body["queue_metrics"]["queue_utilization"], 25.0);
    assert_eq!(body["health_metrics"]["status"], "healthy");
    assert_eq!(
        body["endpoint_url"],
        "http://replica-0:5000,http://replica-1:5000"
    );
    assert_eq!(body["performance_metrics"]["selection_strategy"], "round_robin");
    assert!(body["cache_metrics"]["cache_hit_rate"].is_number());
    assert_eq!(body["jobs"]["queued"], 1);
    assert_eq!(body["jobs"]["completed"], 0);
}
