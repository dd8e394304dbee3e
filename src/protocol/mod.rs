//! # Session Protocol
//!
//! Everything above the frame layer: room codes, request types, the host's
//! handler pipeline, the guest handshake and the keep-alive loop.
//!
//! ## Components
//! - **Room code**: validation, generation and mesh credentials
//! - **Types**: well-known request types, player profiles and room state
//! - **Pipeline**: ordered request handlers for hosts
//! - **Handshake**: staged setup from room code to ready tunnel
//! - **Heartbeat**: latency and roster refresh, loss detection

pub mod handshake;
pub mod heartbeat;
pub mod pipeline;
pub mod room_code;
pub mod types;

#[cfg(test)]
mod tests;

pub use handshake::{HandshakeStage, SessionHandshake};
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome};
pub use pipeline::{Dispatch, PacketHandler, PacketPipeline};
pub use room_code::RoomCode;
pub use types::{PlayerKind, PlayerProfile, RoomInfo, RoomState};
