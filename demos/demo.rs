use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use wiretrace::{InboundTraceLayer, SensitivityPolicy, TraceConfig};

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    #[allow(dead_code)]
    password: String,
}

// Demo endpoints
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn login_handler(Json(login): Json<LoginRequest>) -> impl IntoResponse {
    // The issued token appears masked in the exchange log, but the caller
    // receives the real value.
    Json(serde_json::json!({
        "user": login.username,
        "token": "secret-session-token",
    }))
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn error_handler() -> impl IntoResponse {
    // Logged at error severity because of the status code.
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "message": "something broke" })),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting exchange tracing demo server");

    let policy = Arc::new(
        SensitivityPolicy::new(["authorization"], ["password", "token"]),
    );

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/login", post(login_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/error", get(error_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(InboundTraceLayer::new(TraceConfig::new(policy)))
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /login      - JSON exchange with masked password/token");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /streaming  - Streaming response, captured chunk by chunk");
    info!("  GET  /error      - 500 response, logged at error severity");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!(
        "  curl -X POST -H 'content-type: application/json' \
         -d '{{\"username\":\"alice\",\"password\":\"hunter2\"}}' http://localhost:3000/login"
    );
    info!("  curl -H 'authorization: Bearer xyz' http://localhost:3000/hello");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/error");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
