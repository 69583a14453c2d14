//! Per-exchange assembly of request and response snapshots.
//!
//! One [`ExchangeRecorder`] exists per in-flight exchange and is owned by the
//! task assembling it; nothing is shared across exchanges. Both outcome
//! methods consume the recorder, so an exchange is finalized exactly once.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::error;

use crate::body_capture::CaptureHandle;
use crate::types::{
    BodySnapshot, Direction, ExchangeRecord, Outcome, RequestSnapshot, ResponseSnapshot,
};

pub(crate) struct ExchangeRecorder {
    correlation_id: u64,
    direction: Direction,
    started_at: SystemTime,
    clock: Instant,
    method: Method,
    target: Uri,
    headers: HeaderMap,
    request_capture: Option<CaptureHandle>,
    tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl ExchangeRecorder {
    /// Request metadata is fixed here; the body arrives later through the
    /// capture handle.
    pub(crate) fn new(
        correlation_id: u64,
        direction: Direction,
        method: Method,
        target: Uri,
        headers: HeaderMap,
        request_capture: Option<CaptureHandle>,
        tx: mpsc::UnboundedSender<ExchangeRecord>,
    ) -> Self {
        Self {
            correlation_id,
            direction,
            started_at: SystemTime::now(),
            clock: Instant::now(),
            method,
            target,
            headers,
            request_capture,
            tx,
        }
    }

    /// A response arrived. Waits for both body captures to reach a terminal
    /// state, then emits the record.
    pub(crate) async fn complete(
        self,
        status: StatusCode,
        response_headers: HeaderMap,
        response_capture: Option<CaptureHandle>,
    ) {
        let Self {
            correlation_id,
            direction,
            started_at,
            clock,
            method,
            target,
            headers,
            request_capture,
            tx,
        } = self;

        let request_body = match request_capture {
            Some(handle) => Some(BodySnapshot::from_capture(handle.await, &headers)),
            None => None,
        };
        let response_body = match response_capture {
            Some(handle) => Some(BodySnapshot::from_capture(handle.await, &response_headers)),
            None => None,
        };
        let elapsed = clock.elapsed();

        let record = ExchangeRecord {
            correlation_id,
            direction,
            request: RequestSnapshot {
                timestamp: started_at,
                method,
                target,
                headers,
                body: request_body,
            },
            response: Some(ResponseSnapshot {
                status,
                headers: response_headers,
                body: response_body,
            }),
            outcome: Outcome::classify(status),
            elapsed,
        };

        if tx.send(record).is_err() {
            error!(correlation_id, "Exchange worker is gone, record dropped");
        }
    }

    /// No response will ever arrive. Emits the record with whatever request
    /// data is available.
    pub(crate) async fn fail(self, description: String) {
        let Self {
            correlation_id,
            direction,
            started_at,
            clock,
            method,
            target,
            headers,
            request_capture,
            tx,
        } = self;

        let request_body = match request_capture {
            Some(handle) => Some(BodySnapshot::from_capture(handle.await, &headers)),
            None => None,
        };
        let elapsed = clock.elapsed();

        let record = ExchangeRecord {
            correlation_id,
            direction,
            request: RequestSnapshot {
                timestamp: started_at,
                method,
                target,
                headers,
                body: request_body,
            },
            response: None,
            outcome: Outcome::TransportFailure(description),
            elapsed,
        };

        if tx.send(record).is_err() {
            error!(correlation_id, "Exchange worker is gone, record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body_capture::capture_body_stream;
    use axum::body::Body;
    use bytes::Bytes;
    use http_body_util::BodyExt;

    fn recorder(
        request_capture: Option<CaptureHandle>,
    ) -> (
        ExchangeRecorder,
        mpsc::UnboundedReceiver<ExchangeRecord>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = ExchangeRecorder::new(
            7,
            Direction::Inbound,
            Method::POST,
            Uri::from_static("/things"),
            HeaderMap::new(),
            request_capture,
            tx,
        );
        (recorder, rx)
    }

    #[tokio::test]
    async fn complete_emits_one_record_with_both_snapshots() {
        let (body, capture) = capture_body_stream(Body::from("req-bytes"));
        let drain = tokio::spawn(async move { body.collect().await.unwrap() });

        let (recorder, mut rx) = recorder(Some(capture));
        drain.await.unwrap();

        recorder
            .complete(StatusCode::OK, HeaderMap::new(), None)
            .await;

        let record = rx.recv().await.unwrap();
        assert_eq!(record.correlation_id, 7);
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(
            record.request.body.as_ref().unwrap().bytes(),
            &Bytes::from("req-bytes")
        );
        let response = record.response.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_none());
        // The recorder was consumed, so its sender is gone and no further
        // record can arrive for this exchange.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn error_status_classifies_as_http_error() {
        let (recorder, mut rx) = recorder(None);
        recorder
            .complete(StatusCode::BAD_GATEWAY, HeaderMap::new(), None)
            .await;

        let record = rx.recv().await.unwrap();
        assert_eq!(record.outcome, Outcome::HttpError(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn fail_emits_request_only_record() {
        let (recorder, mut rx) = recorder(None);
        recorder.fail("connection refused".to_owned()).await;

        let record = rx.recv().await.unwrap();
        assert!(record.response.is_none());
        assert_eq!(
            record.outcome,
            Outcome::TransportFailure("connection refused".to_owned())
        );
        assert_eq!(record.request.method, Method::POST);
    }
}
