//! Concurrent callers sharing one tunnel.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use mesh_room::core::codec::RequestFramer;
use mesh_room::core::packet::{RequestFrame, ResponseFrame};
use mesh_room::transport::ResponseCorrelator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Host that answers each request with its own type, and fails the test if a
/// second request shows up while one is still unanswered.
async fn strict_host(stream: DuplexStream, overlaps: Arc<AtomicUsize>) {
    let mut framed = Framed::new(stream, RequestFramer);
    while let Some(Ok(request)) = framed.next().await {
        if let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(5), framed.next()).await {
            overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let reply = ResponseFrame::ok(request.request_type().as_bytes().to_vec());
        if framed.send(reply).await.is_err() {
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_overlap_on_the_wire() {
    let (client, server) = duplex(64 * 1024);
    let overlaps = Arc::new(AtomicUsize::new(0));
    tokio::spawn(strict_host(server, overlaps.clone()));

    let correlator = Arc::new(ResponseCorrelator::new(client, TIMEOUT));
    let mut tasks = JoinSet::new();
    for caller in 0..8 {
        let correlator = correlator.clone();
        tasks.spawn(async move {
            for i in 0..10 {
                let request_type = format!("c:test_{caller}_{i}");
                let resp = correlator
                    .send_request(RequestFrame::empty(request_type.clone()).unwrap(), TIMEOUT)
                    .await
                    .unwrap();
                assert_eq!(resp.data, request_type.as_bytes());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_payloads_are_reassembled() {
    let (client, server) = duplex(1024);
    tokio::spawn(async move {
        let mut framed = Framed::new(server, RequestFramer);
        while let Some(Ok(request)) = framed.next().await {
            let reply = ResponseFrame::ok(request.into_data());
            if framed.send(reply).await.is_err() {
                break;
            }
        }
    });

    let correlator = ResponseCorrelator::new(client, TIMEOUT);
    for size in [0usize, 1, 4096, 300_000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let resp = correlator
            .send_request(RequestFrame::new("c:echo", payload.clone()).unwrap(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resp.data.len(), size);
        assert_eq!(resp.data, payload);
    }
}

#[tokio::test]
async fn dispose_unblocks_waiting_caller() {
    let (client, _server) = duplex(1024);
    let correlator = Arc::new(ResponseCorrelator::new(client, TIMEOUT));

    let waiting = {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            correlator
                .send_request(RequestFrame::empty("c:ping").unwrap(), TIMEOUT)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), correlator.dispose())
        .await
        .expect("dispose should not wait for the request timeout");
    let result = waiting.await.unwrap();
    assert!(result.is_err());
    assert!(!result.unwrap_err().is_timeout());
}
