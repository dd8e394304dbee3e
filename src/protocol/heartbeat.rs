//! Keep-alive loop for a ready session.

use crate::config::ClientConfig;
use crate::core::packet::RequestFrame;
use crate::error::ProtocolError;
use crate::protocol::handshake::fetch_roster;
use crate::protocol::types::RoomState;
use crate::transport::correlator::Requester;
use crate::utils::metrics::global_metrics;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why the heartbeat loop stopped.
#[derive(Debug)]
pub enum HeartbeatOutcome {
    /// The token was cancelled.
    Cancelled,
    /// Too many consecutive timeouts, or a fatal stream error.
    Lost(ProtocolError),
}

/// Periodically pings the host and refreshes the room roster.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    max_failures: u32,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, max_failures: u32) -> Self {
        Self {
            interval,
            max_failures: max_failures.max(1),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.heartbeat_interval, config.max_heartbeat_failures)
    }

    /// Run until cancelled or the connection is declared lost.
    ///
    /// Each round sends `ping`, records its round trip, then replaces the
    /// roster. A timeout counts as a failure and any completed round resets
    /// the count. A roster reply that cannot be decoded keeps the previous
    /// roster: after a timeout the host's late reply shifts every later
    /// pairing by one. Any other error ends the loop.
    pub async fn run(
        &self,
        requester: &dyn Requester,
        room: &RoomState,
        ping: RequestFrame,
        cancel: &CancellationToken,
    ) -> HeartbeatOutcome {
        let mut failures = 0u32;

        loop {
            let round = async {
                let started = Instant::now();
                requester.request(ping.clone()).await?;
                let latency = started.elapsed();
                Ok::<_, ProtocolError>((latency, fetch_roster(requester).await))
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
                result = round => result,
            };

            let result = result.and_then(|(latency, roster)| {
                room.update(|info| info.latency = Some(latency));
                match roster {
                    Ok(players) => {
                        debug!(latency_ms = latency.as_millis() as u64, players = players.len(), "Heartbeat");
                        let host = players.iter().find(|p| p.is_host()).cloned();
                        room.update(|info| {
                            info.players = players;
                            info.host = host;
                        });
                        Ok(())
                    }
                    Err(e) if is_out_of_step(&e) => {
                        warn!(error = %e, "Roster reply out of step, keeping previous roster");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            });

            match result {
                Ok(()) => {
                    failures = 0;
                    global_metrics().heartbeat_ok();
                }
                Err(e) if e.is_timeout() => {
                    failures += 1;
                    global_metrics().heartbeat_failed();
                    warn!(failures, max = self.max_failures, "Heartbeat timed out");
                    if failures >= self.max_failures {
                        return HeartbeatOutcome::Lost(ProtocolError::ConnectionLost);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Heartbeat failed");
                    return HeartbeatOutcome::Lost(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Errors a mispaired roster reply produces: a ping's empty body or a
/// non-zero status meant for another request.
fn is_out_of_step(error: &ProtocolError) -> bool {
    matches!(
        error,
        ProtocolError::Json(_) | ProtocolError::HandshakeProtocolError(_)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::ResponseFrame;
    use crate::error::Result;
    use crate::protocol::types::{REQ_PLAYER_PING, REQ_PLAYER_PROFILES_LIST};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ROSTER: &str = r#"[{"name":"host","machine_id":"m1","vendor":"v","kind":"Host"},
                             {"name":"me","machine_id":"m2","vendor":"v","kind":"Guest"}]"#;

    /// Plays back scripted ping outcomes; cancels once the script runs out.
    struct Scripted {
        pings: Mutex<VecDeque<bool>>,
        sent: AtomicUsize,
        cancel: CancellationToken,
    }

    impl Scripted {
        fn new(script: &[bool], cancel: CancellationToken) -> Self {
            Self {
                pings: Mutex::new(script.iter().copied().collect()),
                sent: AtomicUsize::new(0),
                cancel,
            }
        }
    }

    #[async_trait]
    impl Requester for Scripted {
        async fn request(&self, frame: RequestFrame) -> Result<ResponseFrame> {
            match frame.request_type() {
                REQ_PLAYER_PING => {
                    self.sent.fetch_add(1, Ordering::SeqCst);
                    let next = self.pings.lock().unwrap().pop_front();
                    match next {
                        Some(true) => Ok(ResponseFrame::ok(Vec::new())),
                        Some(false) => {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                            Err(ProtocolError::RequestTimeout)
                        }
                        None => {
                            self.cancel.cancel();
                            std::future::pending().await
                        }
                    }
                }
                REQ_PLAYER_PROFILES_LIST => Ok(ResponseFrame::ok(ROSTER.as_bytes().to_vec())),
                other => panic!("unexpected request {other}"),
            }
        }
    }

    fn ping() -> RequestFrame {
        RequestFrame::new(REQ_PLAYER_PING, b"{}".to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn three_consecutive_timeouts_lose_the_connection() {
        let cancel = CancellationToken::new();
        let requester = Scripted::new(&[true, false, false, false, true], cancel.clone());
        let room = RoomState::new("U/WJAJ-47A0-KXTU-SEUQ");

        let outcome = HeartbeatMonitor::new(Duration::from_secs(5), 3)
            .run(&requester, &room, ping(), &cancel)
            .await;

        assert!(matches!(outcome, HeartbeatOutcome::Lost(ProtocolError::ConnectionLost)));
        assert_eq!(requester.sent.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_count() {
        let cancel = CancellationToken::new();
        let script = [false, false, true, false, false, true];
        let requester = Scripted::new(&script, cancel.clone());
        let room = RoomState::new("U/WJAJ-47A0-KXTU-SEUQ");

        let outcome = HeartbeatMonitor::new(Duration::from_secs(5), 3)
            .run(&requester, &room, ping(), &cancel)
            .await;

        assert!(matches!(outcome, HeartbeatOutcome::Cancelled));
        let info = room.snapshot();
        assert_eq!(info.players.len(), 2);
        assert_eq!(info.host.unwrap().name, "host");
        assert!(info.latency.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_loss() {
        let cancel = CancellationToken::new();
        let requester = Scripted::new(&[true; 100], cancel.clone());
        let room = RoomState::new("U/WJAJ-47A0-KXTU-SEUQ");

        let monitor = HeartbeatMonitor::new(Duration::from_secs(5), 3);
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            stopper.cancel();
        });

        let outcome = monitor.run(&requester, &room, ping(), &cancel).await;
        assert!(matches!(outcome, HeartbeatOutcome::Cancelled));
        assert_eq!(requester.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn late_ping_reply_keeps_the_session_alive() {
        use crate::core::codec::RequestFramer;
        use crate::transport::correlator::ResponseCorrelator;
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut framed = Framed::new(server, RequestFramer);
            let mut first_ping = true;
            while let Some(Ok(request)) = framed.next().await {
                let reply = match request.request_type() {
                    REQ_PLAYER_PING => {
                        if first_ping {
                            first_ping = false;
                            tokio::time::sleep(Duration::from_millis(150)).await;
                        }
                        ResponseFrame::ok(Vec::new())
                    }
                    _ => ResponseFrame::ok(ROSTER.as_bytes().to_vec()),
                };
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        });

        let correlator = ResponseCorrelator::new(client, Duration::from_millis(100));
        let room = RoomState::new("U/WJAJ-47A0-KXTU-SEUQ");
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });

        let outcome = HeartbeatMonitor::new(Duration::from_millis(50), 3)
            .run(&correlator, &room, ping(), &cancel)
            .await;

        assert!(matches!(outcome, HeartbeatOutcome::Cancelled), "{outcome:?}");
        assert!(room.snapshot().latency.is_some());
        assert!(!correlator.is_disposed());
    }
}
