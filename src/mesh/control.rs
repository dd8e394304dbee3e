//! Control surface of a running mesh node.
//!
//! The session only talks to the mesh through [`MeshControl`] and
//! [`MeshLauncher`], so the handshake can run against a real daemon or an
//! in-process double.

use crate::error::Result;
use crate::mesh::peer::MeshPeer;
use crate::protocol::room_code::RoomCode;
use crate::utils::metrics::global_metrics;
use crate::utils::ports::available_tcp_port;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument};

/// Transport a port-forward rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardProtocol {
    Tcp,
    Udp,
}

impl ForwardProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardProtocol::Tcp => "tcp",
            ForwardProtocol::Udp => "udp",
        }
    }
}

/// Lifecycle of the daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running,
    /// Exited on its own, with the exit code when one was reported
    Exited(Option<i32>),
    /// Stopped by [`MeshControl::shutdown`]
    Stopped,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running)
    }
}

/// Network credentials the daemon joins with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub network_name: String,
    pub network_secret: String,
    pub machine_id: Option<String>,
}

impl NetworkIdentity {
    pub fn for_room(code: &RoomCode, machine_id: Option<String>) -> Self {
        Self {
            network_name: code.network_name(),
            network_secret: code.network_secret().to_string(),
            machine_id,
        }
    }
}

#[async_trait]
pub trait MeshControl: Send + Sync {
    /// Current peer list.
    async fn peers(&self) -> Result<Vec<MeshPeer>>;

    /// This node's mesh id.
    async fn node_id(&self) -> Result<String>;

    /// Forward `listen` on this node to `target` on the virtual network.
    async fn add_port_forward(
        &self,
        protocol: ForwardProtocol,
        listen: SocketAddr,
        target: SocketAddr,
    ) -> Result<()>;

    /// Watch the daemon's lifecycle.
    fn status(&self) -> watch::Receiver<DaemonStatus>;

    /// Stop the daemon. Idempotent.
    async fn shutdown(&self);
}

#[async_trait]
pub trait MeshLauncher: Send + Sync {
    /// Start a node joined to the given network.
    async fn launch(&self, identity: &NetworkIdentity) -> Result<Arc<dyn MeshControl>>;

    /// Installed daemon version, if it can be determined.
    async fn daemon_version(&self) -> Option<String> {
        None
    }
}

/// Expose `target` on a fresh local port, for both transports and both
/// loopback families.
///
/// Returns the local port.
#[instrument(skip(control))]
pub async fn forward_port(control: &dyn MeshControl, target: SocketAddr) -> Result<u16> {
    let port = available_tcp_port()?;
    let listens = [
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    ];

    for protocol in [ForwardProtocol::Tcp, ForwardProtocol::Udp] {
        for listen in listens {
            control.add_port_forward(protocol, listen, target).await?;
            global_metrics().port_forward_installed();
            debug!(protocol = protocol.as_str(), %listen, %target, "Port forward installed");
        }
    }

    Ok(port)
}
