//! # Wiretrace
//!
//! Tower middleware that sits between a service and its callers (inbound) and
//! between a service and the systems it calls (outbound), captures the full
//! request/response exchange (including streamed bodies), and logs one
//! redacted diagnostic record per exchange.
//!
//! ## Features
//!
//! - **Stream-aware**: bodies keep flowing to their real consumer while a
//!   copy accumulates for the log; chunk order, boundaries, and timing are
//!   untouched
//! - **Redaction built in**: sensitive header names and JSON field names are
//!   masked before anything reaches a log sink; the proxied bytes are never
//!   modified
//! - **Outcome-driven severity**: error statuses and transport failures log
//!   at error level, everything else at info; disabled levels skip all
//!   capture formatting work
//! - **Background processing**: record assembly and logging happen off the
//!   request path
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::post, Json, Router};
//! use wiretrace::{InboundTraceLayer, SensitivityPolicy, TraceConfig};
//!
//! async fn login(Json(payload): Json<serde_json::Value>) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "token": "issued-secret" }))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt().init();
//!
//!     let policy = Arc::new(
//!         SensitivityPolicy::new(["authorization"], ["token", "password"]),
//!     );
//!
//!     let app = Router::new()
//!         .route("/login", post(login))
//!         .layer(InboundTraceLayer::new(TraceConfig::new(policy)));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! A request like `{"token":"abc","name":"x"}` with an `Authorization` header
//! is logged as `{"token":"******","name":"x"}` with `authorization: ******`,
//! while the wire traffic is delivered byte-for-byte unchanged.
//!
//! ## Custom Handlers
//!
//! The default [`RedactingLogger`] can be swapped for any
//! [`ExchangeHandler`] implementation:
//!
//! ```rust
//! use wiretrace::{ExchangeHandler, ExchangeRecord};
//!
//! #[derive(Debug)]
//! struct AuditHandler;
//!
//! impl ExchangeHandler for AuditHandler {
//!     async fn handle_exchange(&self, record: ExchangeRecord) {
//!         println!("{} {} -> {:?}", record.request.method, record.request.target, record.outcome);
//!     }
//! }
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::SystemTime;

pub mod body_capture;
pub mod emit;
pub mod inbound;
pub mod outbound;
pub mod redact;
pub mod types;

mod recorder;

pub use body_capture::{CaptureState, CapturedBody};
pub use emit::{render_exchange, ExchangeHandler, RedactingLogger};
pub use inbound::InboundTraceLayer;
pub use outbound::OutboundTraceLayer;
pub use redact::{redact_body, redact_headers, PolicyConfig, SensitivityPolicy};
pub use types::{
    BodySnapshot, Direction, ExchangeRecord, Outcome, RequestSnapshot, ResponseSnapshot,
};

/// Global atomic counter for correlation IDs and process start timestamp
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique correlation ID combining process start time and counter
pub(crate) fn next_correlation_id() -> u64 {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    (start_time << 32) | (counter & 0xFFFFFFFF)
}

/// Configuration for the exchange-tracing layers.
///
/// The [`SensitivityPolicy`] is loaded once at startup and shared read-only
/// by every concurrent exchange; the capture toggles control whether bodies
/// are collected at all.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use wiretrace::{SensitivityPolicy, TraceConfig};
///
/// let policy = Arc::new(SensitivityPolicy::default());
///
/// // Capture both bodies (the default)
/// let config = TraceConfig::new(policy.clone());
///
/// // Headers and status only
/// let config = TraceConfig {
///     capture_request_body: false,
///     capture_response_body: false,
///     policy,
/// };
/// ```
#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Whether to capture request bodies
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    pub capture_response_body: bool,
    /// Process-wide redaction policy
    pub policy: Arc<SensitivityPolicy>,
}

impl TraceConfig {
    /// Capture both bodies under the given policy.
    pub fn new(policy: Arc<SensitivityPolicy>) -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
            policy,
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(Arc::new(SensitivityPolicy::default()))
    }
}
