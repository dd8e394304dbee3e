//! Observability and Metrics
//!
//! Session counters for monitoring tunnel health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for session operations
#[derive(Debug)]
pub struct Metrics {
    /// Requests written to the tunnel
    pub requests_sent: AtomicU64,
    /// Responses matched to a request
    pub responses_received: AtomicU64,
    /// Requests that got no response in time
    pub request_timeouts: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached Ready
    pub handshakes_success: AtomicU64,
    /// Handshakes that faulted
    pub handshakes_failed: AtomicU64,
    /// Keep-alives answered
    pub heartbeats_ok: AtomicU64,
    /// Keep-alives that timed out
    pub heartbeats_failed: AtomicU64,
    /// Port-forward rules installed
    pub port_forwards: AtomicU64,
    /// Mesh daemons started
    pub daemon_launches: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            request_timeouts: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            heartbeats_ok: AtomicU64::new(0),
            heartbeats_failed: AtomicU64::new(0),
            port_forwards: AtomicU64::new(0),
            daemon_launches: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn request_sent(&self, byte_count: u64) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn response_received(&self, byte_count: u64) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn request_timeout(&self) {
        self.request_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_ok(&self) {
        self.heartbeats_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_failed(&self) {
        self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn port_forward_installed(&self) {
        self.port_forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn daemon_launched(&self) {
        self.daemon_launches.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            heartbeats_ok: self.heartbeats_ok.load(Ordering::Relaxed),
            heartbeats_failed: self.heartbeats_failed.load(Ordering::Relaxed),
            port_forwards: self.port_forwards.load(Ordering::Relaxed),
            daemon_launches: self.daemon_launches.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            requests_sent = snapshot.requests_sent,
            responses_received = snapshot.responses_received,
            request_timeouts = snapshot.request_timeouts,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            heartbeats_ok = snapshot.heartbeats_ok,
            heartbeats_failed = snapshot.heartbeats_failed,
            port_forwards = snapshot.port_forwards,
            daemon_launches = snapshot.daemon_launches,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub request_timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub heartbeats_ok: u64,
    pub heartbeats_failed: u64,
    pub port_forwards: u64,
    pub daemon_launches: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
