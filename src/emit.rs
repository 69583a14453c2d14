//! Redacted exchange logging.
//!
//! Records arrive here over a channel from the interception points, so
//! nothing in this module runs on the exchange path. A rendering problem is
//! downgraded to a fallback error line and never travels back.

use axum::http::HeaderMap;
use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{enabled, error, info, Level};

use crate::redact::{redact_body, redact_headers, SensitivityPolicy};
use crate::types::{BodySnapshot, ExchangeRecord, Outcome};

const DELIMITER: &str = "=================================================";

/// Processes fully assembled exchanges.
///
/// Implement this to route captured exchanges somewhere other than the
/// default [`RedactingLogger`]: metrics, audit storage, test assertions. One
/// background worker per layer drains the record channel and calls this.
pub trait ExchangeHandler: Send + Sync + 'static {
    fn handle_exchange(&self, record: ExchangeRecord) -> impl Future<Output = ()> + Send;
}

/// Failure while turning a record into log text.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to format exchange record: {0}")]
    Format(#[from] std::fmt::Error),
}

/// The default [`ExchangeHandler`]: picks a severity from the outcome,
/// redacts headers and bodies under the policy, and emits one `tracing` event
/// per exchange.
///
/// When the selected severity is disabled by the subscriber, the record is
/// dropped before any redaction or formatting work happens.
pub struct RedactingLogger {
    policy: Arc<SensitivityPolicy>,
}

impl RedactingLogger {
    pub fn new(policy: Arc<SensitivityPolicy>) -> Self {
        Self { policy }
    }
}

impl ExchangeHandler for RedactingLogger {
    async fn handle_exchange(&self, record: ExchangeRecord) {
        let is_error = severity(&record.outcome) == Level::ERROR;
        let level_enabled = if is_error {
            enabled!(Level::ERROR)
        } else {
            enabled!(Level::INFO)
        };
        if !level_enabled {
            return;
        }

        match render_exchange(&record, &self.policy) {
            Ok(text) => {
                if is_error {
                    error!(
                        correlation_id = record.correlation_id,
                        elapsed_ms = record.elapsed.as_millis() as u64,
                        "{text}"
                    );
                } else {
                    info!(
                        correlation_id = record.correlation_id,
                        elapsed_ms = record.elapsed.as_millis() as u64,
                        "{text}"
                    );
                }
            }
            Err(err) => {
                error!(
                    correlation_id = record.correlation_id,
                    error = %err,
                    "Failed to log exchange"
                );
            }
        }
    }
}

pub(crate) fn severity(outcome: &Outcome) -> Level {
    if outcome.is_error() {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// Render a record into the stable textual layout: a delimited request block
/// (`URI`, `Method`, `Headers`, `Request Body`), then either a delimited
/// response block (`Status code`, `Headers`, `Response Body`) or a `Failure`
/// line for transport failures.
pub fn render_exchange(
    record: &ExchangeRecord,
    policy: &SensitivityPolicy,
) -> Result<String, EmitError> {
    let mut out = String::new();
    let direction = record.direction;

    write_delimiter(&mut out, "Request begin", direction.request_label())?;
    writeln!(out, "{:<16}: {}", "URI", record.request.target)?;
    writeln!(out, "{:<16}: {}", "Method", record.request.method)?;
    writeln!(
        out,
        "{:<16}: {}",
        "Headers",
        format_headers(&record.request.headers, policy)
    )?;
    writeln!(
        out,
        "{:<16}: {}",
        "Request Body",
        format_body(record.request.body.as_ref(), policy)
    )?;
    write_delimiter(&mut out, "Request end", direction.request_label())?;

    match (&record.response, &record.outcome) {
        (Some(response), _) => {
            write_delimiter(&mut out, "Response begin", direction.response_label())?;
            writeln!(out, "{:<16}: {}", "Status code", response.status.as_u16())?;
            writeln!(
                out,
                "{:<16}: {}",
                "Headers",
                format_headers(&response.headers, policy)
            )?;
            writeln!(
                out,
                "{:<16}: {}",
                "Response Body",
                format_body(response.body.as_ref(), policy)
            )?;
            write_delimiter(&mut out, "Response end", direction.response_label())?;
        }
        (None, Outcome::TransportFailure(description)) => {
            writeln!(out, "{:<16}: {}", "Failure", description)?;
        }
        (None, _) => {}
    }

    while out.ends_with('\n') {
        out.pop();
    }
    Ok(out)
}

fn write_delimiter(out: &mut String, title: &str, label: &str) -> std::fmt::Result {
    writeln!(out, "{DELIMITER}{title}({label}){DELIMITER}")
}

fn format_headers(headers: &HeaderMap, policy: &SensitivityPolicy) -> String {
    let redacted = redact_headers(headers, policy);
    let entries: Vec<String> = redacted
        .iter()
        .map(|(name, value)| {
            format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()))
        })
        .collect();
    format!("[{}]", entries.join(", "))
}

fn format_body(body: Option<&BodySnapshot>, policy: &SensitivityPolicy) -> String {
    match body {
        None => "(not captured)".to_owned(),
        Some(snapshot) => {
            let text = redact_body(snapshot, policy);
            if snapshot.is_partial() && !snapshot.is_empty() {
                format!("{text} (incomplete)")
            } else {
                text
            }
        }
    }
}

/// Spawn the background worker that drains assembled records into the
/// handler. Interception services hold the returned sender.
pub(crate) fn spawn_handler_worker<H: ExchangeHandler>(
    handler: H,
) -> mpsc::UnboundedSender<ExchangeRecord> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ExchangeRecord>();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            handler.handle_exchange(record).await;
        }
    });

    tx
}
