//! Inbound interception: a Tower layer for tracing exchanges a service
//! receives.
//!
//! The service wraps the request body before dispatching to the inner stack
//! and the response body on the way out, then hands assembly of the record to
//! a spawned task so the live exchange is never delayed by capture.

use axum::{body::Body, extract::Request, response::Response};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tower::{Layer, Service};
use tracing::{debug, instrument};

use crate::body_capture::capture_body_stream;
use crate::emit::{spawn_handler_worker, ExchangeHandler, RedactingLogger};
use crate::recorder::ExchangeRecorder;
use crate::types::{Direction, ExchangeRecord};
use crate::{next_correlation_id, TraceConfig};

/// Tower layer tracing inbound exchanges.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use axum::{routing::get, Router};
/// use wiretrace::{InboundTraceLayer, SensitivityPolicy, TraceConfig};
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let policy = Arc::new(SensitivityPolicy::new(["authorization"], ["token"]));
/// let layer = InboundTraceLayer::new(TraceConfig::new(policy));
///
/// let app = Router::new().route("/hello", get(hello)).layer(layer);
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct InboundTraceLayer {
    config: TraceConfig,
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl InboundTraceLayer {
    /// Trace inbound exchanges through the default [`RedactingLogger`] built
    /// from the configured policy.
    pub fn new(config: TraceConfig) -> Self {
        let logger = RedactingLogger::new(config.policy.clone());
        Self {
            tx: spawn_handler_worker(logger),
            config,
        }
    }

    /// Route records to a custom handler instead of the default logger.
    pub fn with_handler<H: ExchangeHandler>(config: TraceConfig, handler: H) -> Self {
        Self {
            tx: spawn_handler_worker(handler),
            config,
        }
    }
}

impl<S> Layer<S> for InboundTraceLayer {
    type Service = InboundTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InboundTraceService {
            inner,
            config: self.config.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Service produced by [`InboundTraceLayer`]. Created via the layer, not
/// directly.
#[derive(Clone)]
pub struct InboundTraceService<S> {
    inner: S,
    config: TraceConfig,
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl<S> Service<Request> for InboundTraceService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let correlation_id = next_correlation_id();
        let method = request.method().clone();
        let target = request.uri().clone();
        let headers = request.headers().clone();
        let config = self.config.clone();

        debug!(correlation_id, %method, %target, "Intercepted inbound request");

        let request_capture = if config.capture_request_body {
            let body = std::mem::replace(request.body_mut(), Body::empty());
            let (tapped, handle) = capture_body_stream(body);
            *request.body_mut() = tapped;
            Some(handle)
        } else {
            None
        };

        let recorder = ExchangeRecorder::new(
            correlation_id,
            Direction::Inbound,
            method,
            target,
            headers,
            request_capture,
            self.tx.clone(),
        );

        let future = self.inner.call(request);

        Box::pin(async move {
            match future.await {
                Ok(mut response) => {
                    let status = response.status();
                    let response_headers = response.headers().clone();

                    let response_capture = if config.capture_response_body {
                        let body = std::mem::replace(response.body_mut(), Body::empty());
                        let (tapped, handle) = capture_body_stream(body);
                        *response.body_mut() = tapped;
                        Some(handle)
                    } else {
                        None
                    };

                    // Assembly waits for the response stream to finish, which
                    // outlives this call; it must not hold the response up.
                    tokio::spawn(recorder.complete(status, response_headers, response_capture));

                    Ok(response)
                }
                Err(error) => {
                    tokio::spawn(recorder.fail(error.to_string()));
                    Err(error)
                }
            }
        })
    }
}
