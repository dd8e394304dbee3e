//! A mesh daemon child process and its control CLI.

use crate::config::{DiscoveryConfig, MeshConfig};
use crate::error::{constants, ProtocolError, Result};
use crate::mesh::args::{daemon_args, LaunchOptions};
use crate::mesh::control::{
    DaemonStatus, ForwardProtocol, MeshControl, MeshLauncher, NetworkIdentity,
};
use crate::mesh::discovery::bootstrap_peers;
use crate::mesh::files::MeshFiles;
use crate::mesh::peer::{parse_peers, MeshPeer};
use crate::utils::metrics::global_metrics;
use crate::utils::ports::available_tcp_port;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

/// A running daemon. Dropping it kills the process.
pub struct MeshInstance {
    files: MeshFiles,
    rpc_port: u16,
    status: watch::Receiver<DaemonStatus>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl MeshInstance {
    /// Spawn the daemon with `args`, logging its output at debug level.
    ///
    /// # Errors
    /// `ProcessLaunchFailure` if the executable cannot be started.
    pub fn spawn(files: MeshFiles, rpc_port: u16, args: &[String]) -> Result<Self> {
        let mut child = Command::new(files.core())
            .args(args)
            .current_dir(files.directory())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProtocolError::ProcessLaunchFailure(format!("{}: {e}", files.core().display()))
            })?;

        if let Some(out) = child.stdout.take() {
            tokio::spawn(log_lines(out, "stdout"));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(log_lines(err, "stderr"));
        }

        let (status_tx, status_rx) = watch::channel(DaemonStatus::Running);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, status_tx, kill_rx));

        global_metrics().daemon_launched();
        info!(rpc_port, "Mesh daemon started");

        Ok(Self {
            files,
            rpc_port,
            status: status_rx,
            kill: Mutex::new(Some(kill_tx)),
        })
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    /// Run the control CLI against this daemon and return its stdout.
    ///
    /// # Errors
    /// `ProcessLaunchFailure` if the CLI cannot start, `MeshControl` on a
    /// non-zero exit.
    pub async fn run_cli(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(self.files.cli())
            .arg("--rpc-portal")
            .arg(format!("127.0.0.1:{}", self.rpc_port))
            .args(args)
            .current_dir(self.files.directory())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ProtocolError::ProcessLaunchFailure(format!(
                    "{}: {e}",
                    self.files.cli().display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProtocolError::MeshControl(format!(
                "{} ({})",
                stderr.trim(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn log_lines<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mesh_room::daemon", stream, "{line}");
    }
}

async fn watch_child(
    mut child: Child,
    status: watch::Sender<DaemonStatus>,
    kill: oneshot::Receiver<()>,
) {
    tokio::select! {
        exit = child.wait() => {
            let code = exit.ok().and_then(|s| s.code());
            warn!(?code, "{}", constants::ERR_DAEMON_EXITED);
            let _ = status.send(DaemonStatus::Exited(code));
        }
        _ = kill => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill mesh daemon");
            }
            info!("Mesh daemon stopped");
            let _ = status.send(DaemonStatus::Stopped);
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    peer_id: Option<serde_json::Value>,
}

/// Extract `peer_id` from `<cli> node` output.
pub(crate) fn parse_node_id(json: &str) -> Result<String> {
    let info: NodeInfo = serde_json::from_str(json)?;
    match info.peer_id {
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(ProtocolError::MeshControl(constants::ERR_NODE_ID_MISSING.into())),
    }
}

#[async_trait]
impl MeshControl for MeshInstance {
    async fn peers(&self) -> Result<Vec<MeshPeer>> {
        parse_peers(&self.run_cli(&["-o", "json", "peer"]).await?)
    }

    async fn node_id(&self) -> Result<String> {
        parse_node_id(&self.run_cli(&["node"]).await?)
    }

    async fn add_port_forward(
        &self,
        protocol: ForwardProtocol,
        listen: SocketAddr,
        target: SocketAddr,
    ) -> Result<()> {
        let listen = listen.to_string();
        let target = target.to_string();
        self.run_cli(&["port-forward", "add", protocol.as_str(), &listen, &target])
            .await
            .map(|_| ())
    }

    fn status(&self) -> watch::Receiver<DaemonStatus> {
        self.status.clone()
    }

    async fn shutdown(&self) {
        let sender = match self.kill.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(kill) = sender {
            let _ = kill.send(());
            let mut status = self.status.clone();
            let _ = tokio::time::timeout(
                crate::utils::timeout::SHUTDOWN_TIMEOUT,
                status.wait_for(|s| !s.is_running()),
            )
            .await;
        }
    }
}

/// Launches the real daemon from the configured installation.
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    mesh: MeshConfig,
    discovery: DiscoveryConfig,
}

impl DaemonLauncher {
    pub fn new(mesh: MeshConfig, discovery: DiscoveryConfig) -> Self {
        Self { mesh, discovery }
    }
}

#[async_trait]
impl MeshLauncher for DaemonLauncher {
    #[instrument(skip(self, identity), fields(network = %identity.network_name))]
    async fn launch(&self, identity: &NetworkIdentity) -> Result<Arc<dyn MeshControl>> {
        let files = MeshFiles::from_config(&self.mesh);
        files.check()?;

        let mut peers = self.mesh.relay_servers.clone();
        peers.extend(bootstrap_peers(&self.discovery).await);

        let launch = LaunchOptions {
            network_name: identity.network_name.clone(),
            network_secret: identity.network_secret.clone(),
            hostname: uuid::Uuid::new_v4().to_string(),
            machine_id: identity.machine_id.clone(),
            rpc_port: available_tcp_port()?,
            tcp_whitelist: vec!["0".into()],
            udp_whitelist: vec!["0".into()],
            peers,
        };
        let args = daemon_args(&self.mesh, &launch)?;
        debug!(args = %args.join(" "), "Launching mesh daemon");

        Ok(Arc::new(MeshInstance::spawn(files, launch.rpc_port, &args)?))
    }

    async fn daemon_version(&self) -> Option<String> {
        MeshFiles::from_config(&self.mesh)
            .daemon_version()
            .await
            .map_err(|e| debug!(error = %e, "Daemon version unavailable"))
            .ok()
    }
}
