//! Ephemeral port allocation.

use crate::error::Result;
use std::net::{Ipv4Addr, TcpListener};

/// A loopback TCP port that was free a moment ago.
///
/// The listener is released before returning, so another process could take
/// the port first; callers bind it immediately.
pub fn available_tcp_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
