//! # mesh-room
//!
//! Join a peer-hosted game room over a P2P mesh network.
//!
//! A room is identified by a short, checksummed room code. Joining starts a
//! local mesh daemon on the network the code names, finds the room host among
//! the mesh peers, tunnels a TCP connection to it and speaks a small
//! request/response protocol: capability negotiation, game port lookup,
//! player roster and a periodic keep-alive.
//!
//! ## Modules
//! - [`core`]: frame layout and stream framing
//! - [`protocol`]: room codes, handshake, heartbeat and the host pipeline
//! - [`transport`]: request correlation and the host-side server loop
//! - [`mesh`]: daemon launch, control CLI, peers and bootstrap discovery
//! - [`service`]: the [`Session`](service::Session) entry point
//! - [`config`], [`error`], [`utils`]: ambient support
//!
//! ## Example
//! ```no_run
//! use mesh_room::config::SessionConfig;
//! use mesh_room::service::{Session, SessionOptions};
//!
//! # async fn join() -> mesh_room::error::Result<()> {
//! let options = SessionOptions::new("U/WJAJ-47A0-KXTU-SEUQ", "Steve");
//! let session = Session::connect(options, SessionConfig::from_env()?).await?;
//!
//! println!("game server on 127.0.0.1:{}", session.room_info().game_port);
//! let reason = session.closed().await;
//! println!("session ended: {reason:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod mesh;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
