//! # Utility Modules
//!
//! Supporting utilities shared by the session components.
//!
//! ## Components
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: thread-safe session counters
//! - **Ports**: ephemeral loopback port allocation
//! - **Timeout**: timeout constants and async wrappers

pub mod logging;
pub mod metrics;
pub mod ports;
pub mod timeout;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
