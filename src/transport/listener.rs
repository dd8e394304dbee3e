//! Host side of the session protocol.
//!
//! Serves requests on accepted tunnel connections through a
//! [`PacketPipeline`]. Used by the room host and by in-process test hosts.

use crate::core::codec::RequestFramer;
use crate::core::packet::{ResponseFrame, STATUS_UNHANDLED};
use crate::error::Result;
use crate::protocol::pipeline::{Dispatch, PacketPipeline};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

/// Answer requests on `stream` until the peer disconnects.
///
/// Requests nobody handles get status 255; a handler error gets status 1
/// with the error text as data.
pub async fn serve_connection<S>(stream: S, pipeline: Arc<PacketPipeline>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, RequestFramer);

    while let Some(request) = framed.next().await {
        let request = request?;
        let response = match pipeline.dispatch(&request).await {
            Ok(Dispatch::Handled(response)) => response,
            Ok(Dispatch::Unhandled) => {
                debug!(request_type = %request.request_type(), "Unhandled request");
                ResponseFrame::new(STATUS_UNHANDLED, Vec::new())
            }
            Err(e) => {
                warn!(request_type = %request.request_type(), error = %e, "Handler failed");
                ResponseFrame::new(1, e.to_string().into_bytes())
            }
        };
        framed.send(response).await?;
    }

    Ok(())
}

/// Accept connections on `listener` until `shutdown_rx` fires.
#[instrument(skip(listener, pipeline, shutdown_rx))]
pub async fn start_server_with_shutdown(
    listener: TcpListener,
    pipeline: Arc<PacketPipeline>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "Listening for room members");

    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down listener. Waiting for connections to close...");

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                tokio::pin!(timeout);

                loop {
                    let connections = active_connections.load(Ordering::Acquire);
                    if connections == 0 {
                        info!("All connections closed");
                        break;
                    }
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!(connections, "Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    }
                }

                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let pipeline = pipeline.clone();
                        let active_connections = active_connections.clone();
                        active_connections.fetch_add(1, Ordering::AcqRel);

                        tokio::spawn(async move {
                            debug!(%peer, "Member connected");
                            if let Err(e) = serve_connection(stream, pipeline).await {
                                debug!(%peer, error = %e, "Member connection ended with error");
                            }
                            active_connections.fetch_sub(1, Ordering::AcqRel);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::codec::StreamFramer;
    use crate::core::packet::RequestFrame;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn unknown_types_get_unhandled_status() {
        let pipeline = Arc::new(
            PacketPipeline::new().respond(["c:ping"], |req| Ok(ResponseFrame::ok(req.data().to_vec()))),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let server = tokio::spawn(start_server_with_shutdown(listener, pipeline, shutdown_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, StreamFramer);

        framed.send(RequestFrame::new("c:ping", b"hi".to_vec()).unwrap()).await.unwrap();
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp, ResponseFrame::ok(b"hi".to_vec()));

        framed.send(RequestFrame::empty("c:nope").unwrap()).await.unwrap();
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.status, STATUS_UNHANDLED);

        drop(framed);
        shutdown_tx.send(()).await.unwrap();
        server.await.unwrap().unwrap();
    }
}
