//! Guest session: handshake, keep-alive supervision and request access.

use crate::config::SessionConfig;
use crate::core::packet::{RequestFrame, ResponseFrame};
use crate::error::{ProtocolError, Result};
use crate::mesh::control::{DaemonStatus, MeshControl, MeshLauncher};
use crate::mesh::instance::DaemonLauncher;
use crate::protocol::handshake::{Established, SessionHandshake};
use crate::protocol::heartbeat::{HeartbeatMonitor, HeartbeatOutcome};
use crate::protocol::room_code::RoomCode;
use crate::protocol::types::{PlayerKind, PlayerProfile, RoomInfo, RoomState};
use crate::transport::correlator::ResponseCorrelator;
use crate::utils::metrics::global_metrics;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Who is joining which room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub room_code: String,
    pub player_name: String,
    pub machine_id: String,
    /// Client description sent to the host; derived from the crate and
    /// daemon versions when unset
    pub vendor: Option<String>,
}

impl SessionOptions {
    pub fn new(room_code: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            room_code: room_code.into(),
            player_name: player_name.into(),
            machine_id: String::new(),
            vendor: None,
        }
    }

    pub fn with_machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = machine_id.into();
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }
}

/// Why a ready session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the caller
    Closed,
    /// Keep-alives stopped getting answers
    ConnectionLost,
    /// The mesh daemon went away
    DaemonExited(Option<i32>),
    /// The tunnel failed
    Failed(String),
}

/// A joined room.
///
/// Dropping the session cancels it; the supervisor then releases the tunnel
/// and the mesh daemon.
pub struct Session {
    room: RoomState,
    correlator: Arc<ResponseCorrelator>,
    cancel: CancellationToken,
    closed: watch::Receiver<Option<CloseReason>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Join a room with the daemon installation from `config`.
    pub async fn connect(options: SessionOptions, config: SessionConfig) -> Result<Self> {
        let launcher = Arc::new(DaemonLauncher::new(
            config.mesh.clone(),
            config.discovery.clone(),
        ));
        Self::connect_with(options, config, launcher, CancellationToken::new()).await
    }

    /// Join a room using `launcher` for the mesh node.
    ///
    /// Cancelling `cancel` aborts the handshake, or closes the session once
    /// it is ready.
    ///
    /// # Errors
    /// Input errors (`InvalidRoomCode`, `InvalidArgument`, `ConfigError`) are
    /// returned before anything is started. Any handshake failure is
    /// returned after every acquired resource has been released.
    #[instrument(skip_all, fields(room = %options.room_code))]
    pub async fn connect_with(
        options: SessionOptions,
        config: SessionConfig,
        launcher: Arc<dyn MeshLauncher>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let code = RoomCode::parse(&options.room_code)?;
        if options.player_name.trim().is_empty() {
            return Err(ProtocolError::InvalidArgument("player name is empty".into()));
        }
        config.validate_strict()?;

        let vendor = match options.vendor {
            Some(vendor) => vendor,
            None => default_vendor(launcher.as_ref()).await,
        };
        let profile = PlayerProfile {
            name: options.player_name,
            machine_id: options.machine_id,
            vendor,
            easytier_id: None,
            kind: PlayerKind::Guest,
        };

        let handshake = SessionHandshake::new(code, profile, config.client.clone());
        let established = handshake.run(launcher.as_ref(), &cancel).await?;

        let monitor = HeartbeatMonitor::from_config(&config.client);
        Ok(Self::start(established, monitor, cancel))
    }

    fn start(established: Established, monitor: HeartbeatMonitor, cancel: CancellationToken) -> Self {
        let Established {
            mesh,
            correlator,
            room,
            ping,
        } = established;
        let (closed_tx, closed_rx) = watch::channel(None);

        let supervisor = tokio::spawn(supervise(
            mesh,
            correlator.clone(),
            room.clone(),
            ping,
            monitor,
            cancel.clone(),
            closed_tx,
        ));

        Self {
            room,
            correlator,
            cancel,
            closed: closed_rx,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Current room snapshot.
    pub fn room_info(&self) -> RoomInfo {
        self.room.snapshot()
    }

    /// Shared handle to the room snapshot.
    pub fn state(&self) -> RoomState {
        self.room.clone()
    }

    /// Send a request to the host.
    ///
    /// Unless `bypass_support_check` is set, types the host did not accept
    /// during negotiation fail with `UnsupportedRequest` without touching
    /// the wire.
    pub async fn send_request(
        &self,
        frame: RequestFrame,
        bypass_support_check: bool,
    ) -> Result<ResponseFrame> {
        if !bypass_support_check && !self.room.supports(frame.request_type()) {
            return Err(ProtocolError::UnsupportedRequest(
                frame.request_type().to_owned(),
            ));
        }
        if self.is_closed() {
            return Err(ProtocolError::Disposed);
        }
        self.correlator
            .send_request(frame, self.correlator.request_timeout())
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    /// Wait until the session ends and return why.
    // The wait result borrows `closed` and must be dropped before it.
    #[allow(clippy::let_and_return)]
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        let reason = match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Closed),
            Err(_) => CloseReason::Closed,
        };
        reason
    }

    /// Close the session and wait for its resources to be released.
    pub async fn close(&self) -> CloseReason {
        self.cancel.cancel();
        let supervisor = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session supervisor failed");
            }
        }
        self.closed().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn default_vendor(launcher: &dyn MeshLauncher) -> String {
    let daemon = launcher
        .daemon_version()
        .await
        .unwrap_or_else(|| "unknown".into());
    format!(
        "{} v{}, EasyTier v{daemon}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

async fn supervise(
    mesh: Arc<dyn MeshControl>,
    correlator: Arc<ResponseCorrelator>,
    room: RoomState,
    ping: RequestFrame,
    monitor: HeartbeatMonitor,
    cancel: CancellationToken,
    closed: watch::Sender<Option<CloseReason>>,
) {
    let mut status = mesh.status();

    let reason = tokio::select! {
        outcome = monitor.run(correlator.as_ref(), &room, ping, &cancel) => match outcome {
            HeartbeatOutcome::Cancelled => CloseReason::Closed,
            HeartbeatOutcome::Lost(ProtocolError::ConnectionLost) => CloseReason::ConnectionLost,
            HeartbeatOutcome::Lost(e) => CloseReason::Failed(e.to_string()),
        },
        exited = status.wait_for(|s| !s.is_running()) => match exited.map(|s| *s) {
            Ok(DaemonStatus::Exited(code)) => CloseReason::DaemonExited(code),
            Ok(_) | Err(_) => CloseReason::DaemonExited(None),
        },
    };

    cancel.cancel();
    correlator.dispose().await;
    mesh.shutdown().await;
    info!(?reason, "Session closed");
    global_metrics().log_metrics();
    let _ = closed.send(Some(reason));
}
