//! Session handshake: from a room code to a ready tunnel.
//!
//! A [`SessionHandshake`] walks a fixed sequence of stages. It owns every
//! resource it acquires along the way (mesh node, tunnel) and releases all
//! of them if any stage fails or the caller cancels. On success the
//! resources move into an [`Established`] session.
//!
//! ```text
//! Idle -> MeshStarting -> PeerDiscovery -> TunnelConnecting
//!      -> ProtocolNegotiation -> PortForwarding -> RosterSync -> Ready
//! ```

use crate::config::ClientConfig;
use crate::core::packet::{RequestFrame, ResponseFrame};
use crate::error::{constants, ProtocolError, Result};
use crate::mesh::control::{forward_port, MeshControl, MeshLauncher, NetworkIdentity};
use crate::mesh::peer::MeshPeer;
use crate::protocol::room_code::RoomCode;
use crate::protocol::types::{
    local_request_types, PlayerProfile, RoomState, REQ_PLAYER_EASYTIER_ID, REQ_PLAYER_PING,
    REQ_PLAYER_PROFILES_LIST, REQ_PROTOCOLS, REQ_SERVER_PORT,
};
use crate::transport::correlator::{Requester, ResponseCorrelator};
use crate::utils::metrics::{global_metrics, Timer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handshake progress. Only moves forward, or to `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeStage {
    Idle,
    MeshStarting,
    PeerDiscovery,
    TunnelConnecting,
    ProtocolNegotiation,
    PortForwarding,
    RosterSync,
    Ready,
    Faulted,
}

impl HandshakeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeStage::Idle => "idle",
            HandshakeStage::MeshStarting => "mesh_starting",
            HandshakeStage::PeerDiscovery => "peer_discovery",
            HandshakeStage::TunnelConnecting => "tunnel_connecting",
            HandshakeStage::ProtocolNegotiation => "protocol_negotiation",
            HandshakeStage::PortForwarding => "port_forwarding",
            HandshakeStage::RosterSync => "roster_sync",
            HandshakeStage::Ready => "ready",
            HandshakeStage::Faulted => "faulted",
        }
    }

    /// The stage after this one on the success path.
    pub fn next(&self) -> Option<HandshakeStage> {
        use HandshakeStage::*;
        match self {
            Idle => Some(MeshStarting),
            MeshStarting => Some(PeerDiscovery),
            PeerDiscovery => Some(TunnelConnecting),
            TunnelConnecting => Some(ProtocolNegotiation),
            ProtocolNegotiation => Some(PortForwarding),
            PortForwarding => Some(RosterSync),
            RosterSync => Some(Ready),
            Ready | Faulted => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeStage::Ready | HandshakeStage::Faulted)
    }

    /// Whether moving from `self` to `to` is allowed.
    pub fn can_advance_to(&self, to: HandshakeStage) -> bool {
        if to == HandshakeStage::Faulted {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single room host among `peers`, if any.
///
/// # Errors
/// `AmbiguousHost` when more than one peer claims to host.
pub fn select_host(peers: &[MeshPeer]) -> Result<Option<MeshPeer>> {
    let mut hosts = peers.iter().filter(|p| p.is_room_host());
    match (hosts.next(), hosts.next()) {
        (None, _) => Ok(None),
        (Some(host), None) => Ok(Some(host.clone())),
        (Some(_), Some(_)) => Err(ProtocolError::AmbiguousHost),
    }
}

/// `c:protocols` payload: request types separated by NUL.
pub fn encode_protocols<S: AsRef<str>>(types: &[S]) -> Vec<u8> {
    types
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\0")
        .into_bytes()
}

/// Request types in a `c:protocols` response, empty entries dropped.
pub fn parse_supported(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split('\0')
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Game port from a `c:server_port` response.
///
/// # Errors
/// `HandshakeProtocolError` on a non-zero status or a payload that is not a
/// big-endian `u16`.
pub fn parse_server_port(response: &ResponseFrame) -> Result<u16> {
    if !response.is_success() {
        return Err(ProtocolError::HandshakeProtocolError(format!(
            "{} (status {})",
            constants::ERR_SERVER_PORT_STATUS,
            response.status
        )));
    }
    match response.data.as_slice() {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(ProtocolError::HandshakeProtocolError(
            constants::ERR_SERVER_PORT_PAYLOAD.into(),
        )),
    }
}

/// Keep-alive frame carrying the local player's profile.
pub fn player_ping_frame(profile: &PlayerProfile) -> Result<RequestFrame> {
    RequestFrame::new(REQ_PLAYER_PING, serde_json::to_vec(profile)?)
}

/// Fetch and decode the host's player roster.
pub async fn fetch_roster(requester: &dyn Requester) -> Result<Vec<PlayerProfile>> {
    let response = requester
        .request(RequestFrame::empty(REQ_PLAYER_PROFILES_LIST)?)
        .await?;
    if !response.is_success() {
        return Err(ProtocolError::HandshakeProtocolError(format!(
            "{REQ_PLAYER_PROFILES_LIST} failed with status {}",
            response.status
        )));
    }
    Ok(serde_json::from_slice(&response.data)?)
}

/// Resources of a session that reached `Ready`.
pub struct Established {
    pub mesh: Arc<dyn MeshControl>,
    pub correlator: Arc<ResponseCorrelator>,
    pub room: RoomState,
    /// Keep-alive frame to use from now on
    pub ping: RequestFrame,
}

/// Drives one guest through the handshake stages.
pub struct SessionHandshake {
    code: RoomCode,
    profile: PlayerProfile,
    client: ClientConfig,
    room: RoomState,
    stage: watch::Sender<HandshakeStage>,
    mesh: Option<Arc<dyn MeshControl>>,
    correlator: Option<Arc<ResponseCorrelator>>,
    ping: Option<RequestFrame>,
}

impl SessionHandshake {
    pub fn new(code: RoomCode, profile: PlayerProfile, client: ClientConfig) -> Self {
        let room = RoomState::new(code.as_str());
        Self {
            code,
            profile,
            client,
            room,
            stage: watch::channel(HandshakeStage::Idle).0,
            mesh: None,
            correlator: None,
            ping: None,
        }
    }

    pub fn stage(&self) -> HandshakeStage {
        *self.stage.borrow()
    }

    /// Follow stage changes.
    pub fn subscribe(&self) -> watch::Receiver<HandshakeStage> {
        self.stage.subscribe()
    }

    /// Room snapshot being filled in by the handshake.
    pub fn room(&self) -> RoomState {
        self.room.clone()
    }

    fn advance(&self, to: HandshakeStage) -> Result<()> {
        let from = self.stage();
        if !from.can_advance_to(to) {
            return Err(ProtocolError::HandshakeProtocolError(format!(
                "{}: {from} -> {to}",
                constants::ERR_STAGE_ORDER
            )));
        }
        debug!(%from, %to, "Handshake stage");
        self.stage.send_replace(to);
        Ok(())
    }

    /// Run every stage. On failure or cancellation, everything acquired so
    /// far is released and the stage ends at `Faulted`.
    #[instrument(skip_all, fields(room = %self.code))]
    pub async fn run(
        mut self,
        launcher: &dyn MeshLauncher,
        cancel: &CancellationToken,
    ) -> Result<Established> {
        let _timer = Timer::start("handshake");
        global_metrics().handshake_attempt();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ProtocolError::Cancelled),
            result = self.drive(launcher) => result,
        };

        match outcome {
            Ok(()) => {
                global_metrics().handshake_success();
                info!(room = %self.code, "Session ready");
                self.established()
            }
            Err(e) => {
                global_metrics().handshake_failed();
                warn!(stage = %self.stage(), error = %e, "Handshake failed");
                self.stage.send_replace(HandshakeStage::Faulted);
                self.teardown().await;
                Err(e)
            }
        }
    }

    fn established(&mut self) -> Result<Established> {
        match (self.mesh.take(), self.correlator.take(), self.ping.take()) {
            (Some(mesh), Some(correlator), Some(ping)) => Ok(Established {
                mesh,
                correlator,
                room: self.room.clone(),
                ping,
            }),
            _ => Err(ProtocolError::HandshakeProtocolError(
                constants::ERR_STAGE_ORDER.into(),
            )),
        }
    }

    async fn teardown(&mut self) {
        if let Some(correlator) = self.correlator.take() {
            correlator.dispose().await;
        }
        if let Some(mesh) = self.mesh.take() {
            mesh.shutdown().await;
        }
    }

    async fn drive(&mut self, launcher: &dyn MeshLauncher) -> Result<()> {
        self.advance(HandshakeStage::MeshStarting)?;
        let mesh = self.start_mesh(launcher).await?;

        let mut status = mesh.status();
        tokio::select! {
            result = self.join_room(mesh.as_ref()) => result,
            _ = status.wait_for(|s| !s.is_running()) => Err(ProtocolError::ProcessLaunchFailure(
                constants::ERR_DAEMON_EXITED.into(),
            )),
        }
    }

    async fn join_room(&mut self, mesh: &dyn MeshControl) -> Result<()> {
        self.advance(HandshakeStage::PeerDiscovery)?;
        let host = self.discover_host(mesh).await?;
        let host_ip = host.virtual_ipv4().ok_or_else(|| {
            ProtocolError::HandshakeProtocolError(format!(
                "host {} has no virtual address",
                host.hostname
            ))
        })?;
        let host_port = host.host_port()?;
        info!(host = %host.hostname, %host_ip, host_port, "Found room host");
        self.room.update(|info| info.host_peer = Some(host));

        self.advance(HandshakeStage::TunnelConnecting)?;
        let correlator = self.connect_tunnel(mesh, host_ip, host_port).await?;

        self.advance(HandshakeStage::ProtocolNegotiation)?;
        self.negotiate(mesh, correlator.as_ref()).await?;

        self.advance(HandshakeStage::PortForwarding)?;
        let response = correlator
            .request(RequestFrame::empty(REQ_SERVER_PORT)?)
            .await?;
        let game_port = parse_server_port(&response)?;
        let target = SocketAddr::new(IpAddr::V4(host_ip), game_port);
        let local_port = forward_port(mesh, target).await?;
        info!(game_port, local_port, "Game server forwarded");
        self.room.update(|info| info.game_port = local_port);

        self.advance(HandshakeStage::RosterSync)?;
        let players = fetch_roster(correlator.as_ref()).await?;
        debug!(players = players.len(), "Roster received");
        self.room.set_players(players);

        self.advance(HandshakeStage::Ready)
    }

    async fn start_mesh(&mut self, launcher: &dyn MeshLauncher) -> Result<Arc<dyn MeshControl>> {
        let machine_id = Some(self.profile.machine_id.clone()).filter(|id| !id.is_empty());
        let identity = NetworkIdentity::for_room(&self.code, machine_id);
        let mesh = launcher.launch(&identity).await?;
        self.mesh = Some(mesh.clone());
        Ok(mesh)
    }

    async fn discover_host(&self, mesh: &dyn MeshControl) -> Result<MeshPeer> {
        let status = mesh.status();
        for attempt in 1..=self.client.discovery_attempts {
            if !status.borrow().is_running() {
                return Err(ProtocolError::ProcessLaunchFailure(
                    constants::ERR_DAEMON_EXITED.into(),
                ));
            }

            match mesh.peers().await {
                Ok(peers) => {
                    if let Some(host) = select_host(&peers)? {
                        return Ok(host);
                    }
                    debug!(attempt, peers = peers.len(), "Host not visible yet");
                }
                Err(e) => debug!(attempt, error = %e, "Peer list unavailable"),
            }

            if attempt < self.client.discovery_attempts {
                tokio::time::sleep(self.client.discovery_interval).await;
            }
        }
        Err(ProtocolError::PeerDiscoveryTimeout)
    }

    async fn connect_tunnel(
        &mut self,
        mesh: &dyn MeshControl,
        host_ip: Ipv4Addr,
        host_port: u16,
    ) -> Result<Arc<ResponseCorrelator>> {
        let target = SocketAddr::new(IpAddr::V4(host_ip), host_port);
        let local_port = forward_port(mesh, target).await?;

        let stream = tokio::time::timeout(
            self.client.connect_timeout,
            TcpStream::connect((Ipv4Addr::LOCALHOST, local_port)),
        )
        .await
        .map_err(|_| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("tunnel connect to 127.0.0.1:{local_port} timed out"),
            ))
        })??;
        stream.set_nodelay(true)?;
        debug!(local_port, %target, "Tunnel connected");

        let correlator = Arc::new(ResponseCorrelator::new(stream, self.client.request_timeout));
        self.correlator = Some(correlator.clone());
        Ok(correlator)
    }

    async fn negotiate(&mut self, mesh: &dyn MeshControl, requester: &dyn Requester) -> Result<()> {
        let ping = player_ping_frame(&self.profile)?;
        requester.request(ping.clone()).await?;

        let local = local_request_types(&self.client.extra_request_types);
        let response = requester
            .request(RequestFrame::new(REQ_PROTOCOLS, encode_protocols(&local))?)
            .await?;
        if !response.is_success() {
            return Err(ProtocolError::HandshakeProtocolError(format!(
                "{REQ_PROTOCOLS} failed with status {}",
                response.status
            )));
        }
        let supported = parse_supported(&response.data);
        debug!(supported = %supported.join(" "), "Host request types");
        self.room.update(|info| info.supported_requests = supported);

        if self.room.supports(REQ_PLAYER_EASYTIER_ID) {
            self.profile.easytier_id = Some(mesh.node_id().await?);
            let enriched = player_ping_frame(&self.profile)?;
            requester.request(enriched.clone()).await?;
            self.ping = Some(enriched);
        } else {
            self.ping = Some(ping);
        }
        Ok(())
    }
}
