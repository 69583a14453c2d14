//! Body streaming and capture utilities.
//!
//! [`capture_body_stream`] wraps a live HTTP body so that every chunk keeps
//! flowing to its real consumer untouched while a cheap copy accumulates in
//! the background. The accumulated copy is only for the exchange log; the
//! consumer never waits on it.

use axum::body::{Body, Bytes, HttpBody};
use bytes::BytesMut;
use futures::Stream;
use http_body_util::BodyExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Terminal state of a capture.
///
/// The collector moves `IDLE -> COLLECTING ->` one of these; there is no
/// other exit. Failed and cancelled captures still carry the bytes observed
/// before the stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureState {
    /// The chunk source signalled exhaustion; the snapshot covers the whole
    /// body.
    Complete,
    /// The chunk source errored. The error itself was propagated downstream
    /// unchanged.
    Failed(String),
    /// The consumer stopped reading before exhaustion (client disconnect,
    /// timeout).
    Cancelled,
}

/// The accumulated copy of a body stream plus how the stream ended.
#[derive(Clone, Debug)]
pub struct CapturedBody {
    pub bytes: Bytes,
    pub state: CaptureState,
}

/// Resolves once the wrapped stream reaches a terminal state. Always yields a
/// [`CapturedBody`]; capture problems are encoded in its state, never as an
/// error on the exchange path.
pub type CaptureHandle = Pin<Box<dyn Future<Output = CapturedBody> + Send>>;

enum TapEvent {
    Chunk(Bytes),
    End,
    Error(String),
}

/// Forwards the inner stream item-for-item while relaying a copy of each
/// event to the accumulator. Dropping the tap before the inner stream ends is
/// how cancellation reaches the accumulator: the channel closes without an
/// `End` or `Error` marker.
struct TapStream<S> {
    inner: S,
    tx: mpsc::UnboundedSender<TapEvent>,
    terminated: bool,
}

impl<S> Stream for TapStream<S>
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Unpin,
{
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                // Bytes clones are refcounted views, so the copy costs no
                // allocation and the original chunk moves on immediately.
                let _ = this.tx.send(TapEvent::Chunk(chunk.clone()));
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                if !this.terminated {
                    this.terminated = true;
                    let _ = this.tx.send(TapEvent::Error(error.to_string()));
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if !this.terminated {
                    this.terminated = true;
                    let _ = this.tx.send(TapEvent::End);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Wrap a body for capture.
///
/// Returns the replacement body to hand back to the transport and a
/// [`CaptureHandle`] that resolves when the stream terminates. Chunk order,
/// boundaries, and timing are preserved on the forwarded side; forwarding is
/// never gated on the accumulator.
///
/// ```
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use wiretrace::body_capture::{capture_body_stream, CaptureState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (body, capture) = capture_body_stream(Body::from("Hello, World!"));
///
/// let forwarded = body.collect().await.unwrap().to_bytes();
/// let captured = capture.await;
///
/// assert_eq!(forwarded, "Hello, World!");
/// assert_eq!(captured.bytes, "Hello, World!");
/// assert_eq!(captured.state, CaptureState::Complete);
/// # }
/// ```
pub fn capture_body_stream<B>(body: B) -> (Body, CaptureHandle)
where
    B: HttpBody<Data = Bytes, Error = axum::Error> + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    let tapped = TapStream {
        inner: body.into_data_stream(),
        tx,
        terminated: false,
    };
    let new_body = Body::from_stream(tapped);

    let handle = Box::pin(async move {
        let mut buf = BytesMut::new();
        loop {
            match rx.recv().await {
                Some(TapEvent::Chunk(chunk)) => buf.extend_from_slice(&chunk),
                Some(TapEvent::End) => {
                    return CapturedBody {
                        bytes: buf.freeze(),
                        state: CaptureState::Complete,
                    }
                }
                Some(TapEvent::Error(reason)) => {
                    return CapturedBody {
                        bytes: buf.freeze(),
                        state: CaptureState::Failed(reason),
                    }
                }
                // Channel closed without a terminal marker: the forwarded
                // stream was dropped mid-body. Freeze what we have.
                None => {
                    return CapturedBody {
                        bytes: buf.freeze(),
                        state: CaptureState::Cancelled,
                    }
                }
            }
        }
    });

    (new_body, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use futures::{stream, StreamExt};
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn capture_matches_forwarded_body() {
        let (body, capture) = capture_body_stream(Body::from("Hello, World!"));

        let collect_task = tokio::spawn(async move {
            body.collect().await.unwrap().to_bytes()
        });
        let capture_task = tokio::spawn(capture);

        let (forwarded, captured) = tokio::join!(collect_task, capture_task);
        let forwarded = forwarded.unwrap();
        let captured = captured.unwrap();

        assert_eq!(forwarded, "Hello, World!");
        assert_eq!(captured.bytes, "Hello, World!");
        assert_eq!(captured.state, CaptureState::Complete);
    }

    #[tokio::test]
    async fn chunked_body_concatenates_in_order() {
        let chunks = stream::iter(vec![
            Ok::<_, std::convert::Infallible>(Bytes::from("chunk1")),
            Ok(Bytes::from("chunk2")),
            Ok(Bytes::from("chunk3")),
        ]);
        let (body, capture) = capture_body_stream(Body::from_stream(chunks));

        let forwarded = body.collect().await.unwrap().to_bytes();
        let captured = capture.await;

        assert_eq!(forwarded, "chunk1chunk2chunk3");
        assert_eq!(captured.bytes, "chunk1chunk2chunk3");
        assert_eq!(captured.state, CaptureState::Complete);
    }

    #[tokio::test]
    async fn empty_body_completes_with_no_bytes() {
        let (body, capture) = capture_body_stream(Body::empty());

        let forwarded = body.collect().await.unwrap().to_bytes();
        let captured = capture.await;

        assert!(forwarded.is_empty());
        assert!(captured.bytes.is_empty());
        assert_eq!(captured.state, CaptureState::Complete);
    }

    #[tokio::test]
    async fn stream_error_freezes_partial_snapshot_and_propagates() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from("before-error")),
            Err("boom".to_string()),
        ]);
        let (body, capture) = capture_body_stream(Body::from_stream(chunks));

        let mut downstream = body.into_data_stream();
        assert_eq!(
            downstream.next().await.unwrap().unwrap(),
            Bytes::from("before-error")
        );
        let error = downstream.next().await.unwrap().unwrap_err();
        assert!(error.to_string().contains("boom"));

        let captured = capture.await;
        assert_eq!(captured.bytes, "before-error");
        assert!(matches!(captured.state, CaptureState::Failed(_)));
    }

    #[tokio::test]
    async fn dropped_consumer_freezes_partial_snapshot() {
        let chunks = stream::iter(vec![
            Ok::<_, std::convert::Infallible>(Bytes::from("C1")),
            Ok(Bytes::from("C2")),
        ]);
        let (body, capture) = capture_body_stream(Body::from_stream(chunks));

        let mut downstream = body.into_data_stream();
        assert_eq!(downstream.next().await.unwrap().unwrap(), Bytes::from("C1"));
        // Consumer walks away after the first chunk.
        drop(downstream);

        let captured = capture.await;
        assert_eq!(captured.bytes, "C1");
        assert_eq!(captured.state, CaptureState::Cancelled);
    }

    #[tokio::test]
    async fn consumer_never_waits_on_accumulator() {
        // The capture handle is deliberately not polled until after the
        // consumer has drained everything.
        let (body, capture) = capture_body_stream(Body::from("x".repeat(4096)));

        let forwarded = body.collect().await.unwrap().to_bytes();
        assert_eq!(forwarded.len(), 4096);

        let captured = capture.await;
        assert_eq!(captured.bytes.len(), 4096);
        assert_eq!(captured.state, CaptureState::Complete);
    }
}
