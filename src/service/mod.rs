//! # Session Service
//!
//! The public entry point for joining a room: [`Session`] runs the
//! handshake, supervises the keep-alive loop and tears everything down when
//! the session ends.

pub mod session;

pub use session::{CloseReason, Session, SessionOptions};
