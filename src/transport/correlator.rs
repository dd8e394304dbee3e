//! Request/response matching over the tunnel.
//!
//! The session protocol carries no request ids. One request may be in flight
//! at a time and the next decoded response belongs to it. A request that
//! times out may still be answered later; that late answer is then taken as
//! the response to the following request.

use crate::core::codec::StreamFramer;
use crate::core::packet::{RequestFrame, ResponseFrame};
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Decoded responses buffered between the read loop and the waiting request.
const RESPONSE_QUEUE: usize = 16;

/// Anything that can run one request/response exchange.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(&self, frame: RequestFrame) -> Result<ResponseFrame>;
}

struct Channel {
    writer: FramedWrite<BoxedWriter, StreamFramer>,
    responses: mpsc::Receiver<Result<ResponseFrame>>,
}

/// Serializes requests on one stream and pairs each with the next response.
pub struct ResponseCorrelator {
    channel: Mutex<Option<Channel>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    request_timeout: Duration,
}

impl ResponseCorrelator {
    /// Take ownership of `stream` and start its read loop.
    pub fn new<S>(stream: S, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
        let reader = tokio::spawn(read_frames(FramedRead::new(read_half, StreamFramer), tx));
        let writer: BoxedWriter = Box::new(write_half);

        Self {
            channel: Mutex::new(Some(Channel {
                writer: FramedWrite::new(writer, StreamFramer),
                responses: rx,
            })),
            reader: std::sync::Mutex::new(Some(reader)),
            disposed: AtomicBool::new(false),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Write `frame` and wait up to `timeout` for the next response.
    ///
    /// Callers are served one at a time, in lock acquisition order.
    ///
    /// # Errors
    /// - `RequestTimeout` if nothing arrives in time
    /// - `ConnectionLost` if the stream closed cleanly
    /// - `FramingError` or `Io` if the stream failed
    /// - `Disposed` after [`dispose`](Self::dispose)
    #[instrument(skip(self, frame), fields(request_type = %frame.request_type()))]
    pub async fn send_request(
        &self,
        frame: RequestFrame,
        timeout: Duration,
    ) -> Result<ResponseFrame> {
        if self.is_disposed() {
            return Err(ProtocolError::Disposed);
        }

        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(ProtocolError::Disposed)?;
        let sent = frame.encoded_len() as u64;

        let exchange = async {
            channel.writer.send(frame).await?;
            global_metrics().request_sent(sent);
            match channel.responses.recv().await {
                Some(response) => response,
                None => Err(ProtocolError::ConnectionLost),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => {
                global_metrics().response_received(response.encoded_len() as u64);
                debug!(status = response.status, len = response.data.len(), "Response received");
                Ok(response)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                global_metrics().request_timeout();
                debug!(?timeout, "Request timed out");
                Err(ProtocolError::RequestTimeout)
            }
        }
    }

    /// Stop the read loop and close the write side.
    ///
    /// A request that is waiting fails with `ConnectionLost`; later calls
    /// fail with `Disposed`. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_reader();

        let channel = self.channel.lock().await.take();
        if let Some(mut channel) = channel {
            if let Err(e) = channel.writer.close().await {
                debug!(error = %e, "Tunnel close failed");
            }
        }
    }

    fn abort_reader(&self) {
        let handle = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

#[async_trait]
impl Requester for ResponseCorrelator {
    async fn request(&self, frame: RequestFrame) -> Result<ResponseFrame> {
        self.send_request(frame, self.request_timeout).await
    }
}

async fn read_frames<R>(
    mut frames: FramedRead<R, StreamFramer>,
    responses: mpsc::Sender<Result<ResponseFrame>>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(item) = frames.next().await {
        let fatal = item.is_err();
        if let Err(e) = &item {
            warn!(error = %e, "Response stream failed");
        }
        if responses.send(item).await.is_err() || fatal {
            break;
        }
    }
    debug!("Response stream closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::codec::RequestFramer;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Framed;

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Answers every request with its own type name.
    fn echo_host(stream: DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut framed = Framed::new(stream, RequestFramer);
            while let Some(Ok(request)) = framed.next().await {
                let reply = ResponseFrame::ok(request.request_type().as_bytes().to_vec());
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        })
    }

    #[tokio::test]
    async fn pairs_requests_with_responses() {
        let (client, server) = duplex(1024);
        let _host = echo_host(server);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);

        for request_type in ["c:ping", "c:protocols", "c:server_port"] {
            let resp = correlator
                .send_request(RequestFrame::empty(request_type).unwrap(), TIMEOUT)
                .await
                .unwrap();
            assert!(resp.is_success());
            assert_eq!(resp.data, request_type.as_bytes());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (client, _server) = duplex(1024);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);

        let err = correlator
            .send_request(RequestFrame::empty("c:ping").unwrap(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn late_response_goes_to_next_request() {
        let (client, mut server) = duplex(1024);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);

        let err = correlator
            .send_request(RequestFrame::empty("a").unwrap(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        server
            .write_all(&ResponseFrame::ok(b"for-a".to_vec()).to_bytes())
            .await
            .unwrap();
        let resp = correlator
            .send_request(RequestFrame::empty("b").unwrap(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resp.data, b"for-a");
    }

    #[tokio::test]
    async fn closed_stream_is_connection_lost() {
        let (client, server) = duplex(1024);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);
        drop(server);

        let err = correlator
            .send_request(RequestFrame::empty("c:ping").unwrap(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ConnectionLost | ProtocolError::Io(_)
        ));
    }

    #[tokio::test]
    async fn truncated_response_is_framing_error() {
        let (client, mut server) = duplex(1024);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);

        server.write_all(&[0, 0, 0, 0, 9, 1, 2]).await.unwrap();
        server.shutdown().await.unwrap();

        let err = correlator
            .send_request(RequestFrame::empty("c:ping").unwrap(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[tokio::test]
    async fn requests_after_dispose_fail() {
        let (client, server) = duplex(1024);
        let _host = echo_host(server);
        let correlator = ResponseCorrelator::new(client, TIMEOUT);

        correlator.dispose().await;
        correlator.dispose().await;
        assert!(matches!(
            correlator.request(RequestFrame::empty("c:ping").unwrap()).await,
            Err(ProtocolError::Disposed)
        ));
    }
}
