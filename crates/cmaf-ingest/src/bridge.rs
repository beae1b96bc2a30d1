//! Streaming bridge: lets a segment producer write into the body of an
//! HTTP PUT that is already in flight.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONNECTION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Body, Client, StatusCode};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, error, warn};

use crate::types::Credentials;

/// Write side of the bridge, handed to the segment producer.
///
/// Chunks go through a bounded channel, so a producer outrunning the
/// network waits instead of growing memory.
pub struct SegmentWriter {
    tx: PollSender<Bytes>,
    headers: HeaderMap,
    status: StatusCode,
    url: String,
    written: u64,
}

impl SegmentWriter {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        debug!(url = %self.url, %status, "Writer status");
        self.status = status;
    }

    /// Flush acknowledgment. Every chunk is already handed to the request
    /// body as soon as it is written.
    pub fn flush_ack(&self) {
        debug!(url = %self.url, "Flush");
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Whether no further chunk can reach the request, either because the
    /// request body was dropped or because the writer was finished.
    pub fn is_closed(&self) -> bool {
        self.tx.get_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Signal that no more data follows.
    pub fn finish(&mut self) {
        self.tx.close();
    }
}

impl AsyncWrite for SegmentWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(this.tx.poll_reserve(cx)).map_err(|_| closed_error())?;
        this.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| closed_error())?;
        this.written += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().tx.close();
        Poll::Ready(Ok(()))
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "segment request closed")
}

/// Read side of the bridge: ends when the writer finishes or the
/// lifetime token is cancelled.
pub(crate) fn channel(
    url: &str,
    capacity: usize,
    cancel: &CancellationToken,
) -> (
    SegmentWriter,
    impl Stream<Item = io::Result<Bytes>> + Send + 'static,
) {
    let (tx, rx) = mpsc::channel::<Bytes>(capacity.max(1));
    let writer = SegmentWriter {
        tx: PollSender::new(tx),
        headers: HeaderMap::new(),
        status: StatusCode::OK,
        url: url.to_string(),
        written: 0,
    };
    let body = ReceiverStream::new(rx)
        .map(Ok::<Bytes, io::Error>)
        .take_until(cancel.clone().cancelled_owned());
    (writer, body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The request completed and the destination answered
    Completed(StatusCode),
    /// Transport-level failure
    Failed(String),
    /// The request was aborted before completing
    Aborted,
}

/// Handle on the request side of a bridge.
pub struct PushHandle {
    done_rx: oneshot::Receiver<PushOutcome>,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Wait until the request/response cycle has ended.
    pub async fn finished(self) -> PushOutcome {
        self.done_rx.await.unwrap_or(PushOutcome::Aborted)
    }

    /// Drop the in-flight request.
    pub fn abort(self) {
        self.task.abort();
    }
}

pub struct SegmentBridge;

impl SegmentBridge {
    /// Start a chunked PUT to `url` whose body is fed by the returned writer.
    pub fn spawn(
        client: &Client,
        url: String,
        credentials: Option<&Credentials>,
        capacity: usize,
        cancel: &CancellationToken,
    ) -> (SegmentWriter, PushHandle) {
        let (writer, body) = channel(&url, capacity, cancel);

        let mut request = client
            .put(&url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .header(CONNECTION, HeaderValue::from_static("keep-alive"))
            .body(Body::wrap_stream(body));
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if let Err(e) = response.bytes().await {
                        warn!(url = %url, error = %e, "Error reading response body");
                    }
                    debug!(url = %url, %status, "Closing body");
                    PushOutcome::Completed(status)
                }
                Err(e) => {
                    error!(url = %url, error = %e, "Segment PUT failed");
                    PushOutcome::Failed(e.to_string())
                }
            };
            // Receiver may be gone if the unit was abandoned
            let _ = done_tx.send(outcome);
        });

        (writer, PushHandle { done_rx, task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PutReceiver;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_chunks_flow_in_order() {
        let cancel = CancellationToken::new();
        let (mut writer, body) = channel("http://test/seg", 4, &cancel);

        let reader = tokio::spawn(async move {
            body.map(|chunk| chunk.unwrap())
                .collect::<Vec<_>>()
                .await
                .concat()
        });

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.flush_ack();
        assert_eq!(writer.bytes_written(), 11);
        writer.shutdown().await.unwrap();

        assert_eq!(reader.await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_producer_waits_when_full() {
        let cancel = CancellationToken::new();
        let (mut writer, body) = channel("http://test/seg", 1, &cancel);
        let mut body = Box::pin(body);

        writer.write_all(b"first").await.unwrap();
        // Channel holds one chunk; the second write must wait for a read
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), writer.write_all(b"second")).await;
        assert!(blocked.is_err());

        assert_eq!(
            body.next().await.unwrap().unwrap(),
            Bytes::from_static(b"first")
        );
        writer.write_all(b"second").await.unwrap();
        assert_eq!(
            body.next().await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );
    }

    #[tokio::test]
    async fn test_cancellation_ends_body() {
        let cancel = CancellationToken::new();
        let (_writer, body) = channel("http://test/seg", 4, &cancel);
        let mut body = Box::pin(body);

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_write_after_request_gone_fails() {
        let cancel = CancellationToken::new();
        let (mut writer, body) = channel("http://test/seg", 1, &cancel);
        assert!(!writer.is_closed());
        drop(body);
        assert!(writer.is_closed());
        let err = writer.write_all(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_spawned_put_streams_body() {
        let receiver = PutReceiver::start().await;
        let client = Client::new();
        let cancel = CancellationToken::new();
        let creds = Credentials {
            user: "user".to_string(),
            password: "pass".to_string(),
        };

        let (mut writer, push) = SegmentBridge::spawn(
            &client,
            receiver.url("live/v-1.m4s"),
            Some(&creds),
            2,
            &cancel,
        );
        for _ in 0..10 {
            writer.write_all(&[7u8; 1000]).await.unwrap();
        }
        writer.finish();

        assert_eq!(push.finished().await, PushOutcome::Completed(StatusCode::OK));
        let records = receiver.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "live/v-1.m4s");
        assert_eq!(records[0].body.len(), 10_000);
        assert_eq!(
            records[0].content_type.as_deref(),
            Some("application/octet-stream")
        );
        assert!(
            records[0]
                .authorization
                .as_deref()
                .unwrap()
                .starts_with("Basic ")
        );
    }

    #[tokio::test]
    async fn test_finished_writer_is_closed() {
        let cancel = CancellationToken::new();
        let (mut writer, _body) = channel("http://test/seg", 1, &cancel);
        writer.finish();
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_unreachable_destination_reports_failure() {
        let client = Client::new();
        let cancel = CancellationToken::new();
        // Port 9 (discard) on loopback is expected to refuse connections
        let (mut writer, push) = SegmentBridge::spawn(
            &client,
            "http://127.0.0.1:9/seg.m4s".to_string(),
            None,
            1,
            &cancel,
        );
        writer.finish();
        assert!(matches!(push.finished().await, PushOutcome::Failed(_)));
    }
}
