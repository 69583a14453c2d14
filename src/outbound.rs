//! Outbound interception: a Tower layer for tracing calls a service makes to
//! external systems.
//!
//! Wraps a client-side service (for example a `hyper_util` client adapted
//! with `tower::ServiceExt`). The wrapped request body is the one the client
//! actually transmits; the collector observes copies and never alters the
//! bytes on the wire. Transport failures are logged with whatever request
//! data is available and then propagated to the caller unchanged.

use axum::body::Body;
use axum::http::{Request, Response};
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

/// Tower layer tracing outbound exchanges.
#[derive(Clone)]
pub struct OutboundTraceLayer {
    config: TraceConfig,
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl OutboundTraceLayer {
    /// Trace outbound exchanges through the default [`RedactingLogger`]
    /// built from the configured policy.
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

impl<S> Layer<S> for OutboundTraceLayer {
    type Service = OutboundTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OutboundTraceService {
            inner,
            config: self.config.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Service produced by [`OutboundTraceLayer`]. Created via the layer, not
/// directly.
#[derive(Clone)]
pub struct OutboundTraceService<S> {
    inner: S,
    config: TraceConfig,
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl<S> Service<Request<Body>> for OutboundTraceService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let correlation_id = next_correlation_id();
        let method = request.method().clone();
        let target = request.uri().clone();
        let headers = request.headers().clone();
        let config = self.config.clone();

        debug!(correlation_id, %method, %target, "Intercepted outbound request");

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
            Direction::Outbound,
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

                    tokio::spawn(recorder.complete(status, response_headers, response_capture));

                    Ok(response)
                }
                Err(error) => {
                    // Observational only: log the failure, then hand the real
                    // error back to the caller untouched.
                    tokio::spawn(recorder.fail(error.to_string()));
                    Err(error)
                }
            }
        })
    }
}
