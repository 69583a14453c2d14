//! Outbound interception exercised against an in-process client service.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::{Layer, Service, ServiceExt};
use wiretrace::{
    render_exchange, Direction, ExchangeHandler, ExchangeRecord, Outcome, OutboundTraceLayer,
    SensitivityPolicy, TraceConfig,
};

#[derive(Clone)]
struct TestHandler {
    records: Arc<Mutex<Vec<ExchangeRecord>>>,
}

impl TestHandler {
    fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn wait_for_records(&self, expected: usize) -> Vec<ExchangeRecord> {
        for _ in 0..200 {
            if self.records.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.records.lock().unwrap().clone()
    }
}

impl ExchangeHandler for TestHandler {
    async fn handle_exchange(&self, record: ExchangeRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn policy() -> Arc<SensitivityPolicy> {
    Arc::new(SensitivityPolicy::new(["authorization"], ["token"]))
}

/// Stand-in for a real HTTP client: echoes the request body back as JSON.
async fn echo_client(request: Request<Body>) -> Result<Response<Body>, io::Error> {
    let bytes = request
        .into_body()
        .collect()
        .await
        .map_err(io::Error::other)?
        .to_bytes();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .unwrap())
}

/// Stand-in for a client whose connection never succeeds.
async fn refusing_client(_request: Request<Body>) -> Result<Response<Body>, io::Error> {
    Err(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

#[tokio::test]
async fn outbound_exchange_is_recorded_with_both_bodies() {
    let handler = TestHandler::new();
    let layer = OutboundTraceLayer::with_handler(TraceConfig::new(policy()), handler.clone());
    let mut client = layer.layer(tower::service_fn(echo_client));

    let request = Request::builder()
        .method("POST")
        .uri("http://upstream.internal/api/pay")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"token":"abc","amount":5}"#))
        .unwrap();

    let response = client.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The transmitted bytes come through the wrapped body unchanged.
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, r#"{"token":"abc","amount":5}"#.as_bytes());

    let records = handler.wait_for_records(1).await;
    let record = &records[0];
    assert_eq!(record.direction, Direction::Outbound);
    assert_eq!(record.request.target.host(), Some("upstream.internal"));
    assert_eq!(record.outcome, Outcome::Success);
    assert_eq!(
        record.request.body.as_ref().unwrap().bytes(),
        r#"{"token":"abc","amount":5}"#.as_bytes()
    );
    assert_eq!(
        record.response.as_ref().unwrap().body.as_ref().unwrap().bytes(),
        r#"{"token":"abc","amount":5}"#.as_bytes()
    );
}

#[tokio::test]
async fn outbound_record_renders_with_swapped_labels_and_masking() {
    let handler = TestHandler::new();
    let policy = policy();
    let layer =
        OutboundTraceLayer::with_handler(TraceConfig::new(policy.clone()), handler.clone());
    let mut client = layer.layer(tower::service_fn(echo_client));

    let request = Request::builder()
        .method("POST")
        .uri("http://upstream.internal/api/pay")
        .header("content-type", "application/json")
        .header("authorization", "Bearer xyz")
        .body(Body::from(r#"{"token":"abc"}"#))
        .unwrap();

    let response = client.ready().await.unwrap().call(request).await.unwrap();
    response.into_body().collect().await.unwrap();

    let records = handler.wait_for_records(1).await;
    let rendered = render_exchange(&records[0], &policy).unwrap();

    assert!(rendered.contains("Request begin(Outbound)"));
    assert!(rendered.contains("Response begin(Inbound)"));
    assert!(rendered.contains("URI             : http://upstream.internal/api/pay"));
    assert!(rendered.contains("authorization: ******"));
    assert!(rendered.contains(r#"{"token":"******"}"#));
    assert!(!rendered.contains("Bearer xyz"));
}

#[tokio::test]
async fn transport_failure_is_logged_and_propagated() {
    let handler = TestHandler::new();
    let layer = OutboundTraceLayer::with_handler(TraceConfig::new(policy()), handler.clone());

    let mut client = layer.layer(tower::service_fn(refusing_client));

    let request = Request::builder()
        .method("GET")
        .uri("http://upstream.internal/health")
        .body(Body::empty())
        .unwrap();

    // The caller still sees the real failure.
    let error = client.ready().await.unwrap().call(request).await.unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);

    let records = handler.wait_for_records(1).await;
    let record = &records[0];
    assert!(record.response.is_none());
    match &record.outcome {
        Outcome::TransportFailure(description) => {
            assert!(description.contains("connection refused"));
        }
        other => panic!("expected transport failure, got {other:?}"),
    }

    let rendered = render_exchange(record, &policy()).unwrap();
    assert!(rendered.contains("Failure         : "));
    assert!(!rendered.contains("Status code"));
}

#[tokio::test]
async fn outbound_capture_can_be_disabled() {
    let handler = TestHandler::new();
    let config = TraceConfig {
        capture_request_body: false,
        capture_response_body: false,
        policy: policy(),
    };
    let layer = OutboundTraceLayer::with_handler(config, handler.clone());
    let mut client = layer.layer(tower::service_fn(echo_client));

    let request = Request::builder()
        .method("POST")
        .uri("http://upstream.internal/api")
        .body(Body::from("payload"))
        .unwrap();

    let response = client.ready().await.unwrap().call(request).await.unwrap();
    response.into_body().collect().await.unwrap();

    let records = handler.wait_for_records(1).await;
    assert!(records[0].request.body.is_none());
    assert!(records[0].response.as_ref().unwrap().body.is_none());
}
