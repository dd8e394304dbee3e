//! Peers as reported by `<cli> -o json peer`.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Deserializer};
use std::net::Ipv4Addr;

/// Hostname prefix a room host registers under. The text after
/// [`HOST_PORT_OFFSET`] is the host's session-protocol TCP port.
pub const HOST_HOSTNAME_PREFIX: &str = "scaffolding-mc-server";

/// Byte offset of the port in a host hostname (`scaffolding-mc-server-<port>`).
pub const HOST_PORT_OFFSET: usize = HOST_HOSTNAME_PREFIX.len() + 1;

/// Accepts JSON strings and numbers alike; the CLI is not consistent.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A node visible to the mesh daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MeshPeer {
    #[serde(deserialize_with = "lenient_string")]
    pub hostname: String,
    /// Virtual address, possibly with a `/prefix` suffix.
    #[serde(deserialize_with = "lenient_string")]
    pub ipv4: String,
    #[serde(deserialize_with = "lenient_string")]
    pub cost: String,
    #[serde(rename = "lat_ms", deserialize_with = "lenient_string")]
    pub latency_ms: String,
    #[serde(deserialize_with = "lenient_string")]
    pub loss_rate: String,
    #[serde(deserialize_with = "lenient_string")]
    pub nat_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub version: String,
}

impl MeshPeer {
    pub fn is_room_host(&self) -> bool {
        self.hostname.starts_with(HOST_HOSTNAME_PREFIX)
    }

    /// The virtual IPv4 address without any prefix length.
    pub fn virtual_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.split('/').next()?.trim().parse().ok()
    }

    /// Session-protocol port encoded in a host hostname.
    ///
    /// # Errors
    /// `MalformedHostPort` when the suffix is missing or not a `u16`.
    pub fn host_port(&self) -> Result<u16> {
        self.hostname
            .get(HOST_PORT_OFFSET..)
            .and_then(|suffix| suffix.parse::<u16>().ok())
            .ok_or_else(|| ProtocolError::MalformedHostPort(self.hostname.clone()))
    }
}

/// Parse the peer list JSON.
pub fn parse_peers(json: &str) -> Result<Vec<MeshPeer>> {
    Ok(serde_json::from_str(json)?)
}
