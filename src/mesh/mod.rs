//! Mesh daemon management: launch, control CLI, peers and port forwarding.

pub mod args;
pub mod control;
pub mod discovery;
pub mod files;
pub mod instance;
pub mod peer;

pub use control::{DaemonStatus, ForwardProtocol, MeshControl, MeshLauncher, NetworkIdentity};
pub use instance::{DaemonLauncher, MeshInstance};
pub use peer::MeshPeer;
