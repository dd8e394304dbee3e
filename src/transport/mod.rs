//! Tunnel transport: client-side request correlation and the host-side
//! request server.

pub mod correlator;
pub mod listener;

pub use correlator::{Requester, ResponseCorrelator};
