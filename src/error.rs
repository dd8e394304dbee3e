//! # Error Types
//!
//! Error handling for room sessions.
//!
//! Every fallible operation in the crate returns [`Result`], carrying a
//! [`ProtocolError`]. Variants fall into three groups:
//!
//! ## Error Categories
//! - **Caller input**: bad room codes and missing options, reported before
//!   any resource is acquired
//! - **Setup**: mesh environment, daemon launch, host discovery and protocol
//!   negotiation failures that abort a handshake
//! - **Runtime**: framing faults, request timeouts and heartbeat exhaustion on
//!   an established session
//!
//! ## Example Usage
//! ```rust
//! use mesh_room::error::{ProtocolError, Result};
//! use mesh_room::protocol::room_code::RoomCode;
//!
//! fn parse(code: &str) -> Result<RoomCode> {
//!     code.parse()
//! }
//!
//! assert!(matches!(parse("U/ABCD-ABCD-ABCD-ABCD"), Err(ProtocolError::InvalidRoomCode)));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame errors
    pub const ERR_TYPE_TOO_LONG: &str = "Request type exceeds 255 bytes";
    pub const ERR_TRUNCATED_FRAME: &str = "Stream ended inside a frame";
    pub const ERR_INVALID_TYPE_UTF8: &str = "Request type is not valid UTF-8";

    /// Handshake errors
    pub const ERR_SERVER_PORT_STATUS: &str = "Host rejected c:server_port";
    pub const ERR_SERVER_PORT_PAYLOAD: &str = "c:server_port payload is not a u16";
    pub const ERR_NODE_ID_MISSING: &str = "Node info has no peer_id";
    pub const ERR_STAGE_ORDER: &str = "Handshake stage transition out of order";

    /// Mesh errors
    pub const ERR_DAEMON_EXITED: &str = "Mesh daemon exited";
    pub const ERR_STATIC_IPV4_REQUIRED: &str = "Static addressing requires an IPv4 address";
    pub const ERR_NETWORK_NAME_REQUIRED: &str = "Network name and secret are required";
}

/// Primary error type for session operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid room code")]
    InvalidRoomCode,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Mesh environment incomplete: {0}")]
    EnvironmentMissing(String),

    #[error("Failed to launch process: {0}")]
    ProcessLaunchFailure(String),

    #[error("Mesh control command failed: {0}")]
    MeshControl(String),

    #[error("Discovery API failed: {0}")]
    Discovery(String),

    #[error("No host found in the room")]
    PeerDiscoveryTimeout,

    #[error("More than one host found in the room")]
    AmbiguousHost,

    #[error("Host hostname has no valid port suffix: {0}")]
    MalformedHostPort(String),

    #[error("Handshake protocol error: {0}")]
    HandshakeProtocolError(String),

    #[error("Framing error: {0}")]
    FramingError(String),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Request type not supported by host: {0}")]
    UnsupportedRequest(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Session disposed")]
    Disposed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the error is a single missed response rather than a dead link.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::RequestTimeout)
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
