//! Timeout constants and async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// How long a request waits for its response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between keep-alives on a ready session.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// TCP connect through the tunnel.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Node directory HTTP request.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for a killed daemon to be reaped.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `fut`, mapping an elapsed deadline to `RequestTimeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::RequestTimeout)?
}
