//! Connection establishment with exponential backoff
//!
//! Device bridges come up slowly after a brick is plugged in, so the first
//! connect attempts are expected to fail now and then.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::{DeployError, Result};

/// Backoff settings for reaching a device bridge
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Upper bound for the wait between attempts
    pub max_backoff: Duration,
    /// Wait after the first failed attempt
    pub initial_backoff: Duration,
    /// Maximum number of connection attempts (None = infinite)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(2),
            initial_backoff: Duration::from_millis(250),
            max_attempts: Some(3),
        }
    }
}

/// Connect to `addr` with exponential backoff
///
/// The first attempt is immediate. After each refusal the wait doubles
/// (250ms, 500ms, 1s, ...) up to `max_backoff`, for at most `max_attempts`
/// attempts, or forever when that is `None`.
///
/// # Returns
/// * `Ok(TcpStream)` - Connected
/// * `Err(DeployError::Connect)` - Empty address or attempts exhausted
pub async fn connect_with_backoff(addr: &str, config: &ReconnectConfig) -> Result<TcpStream> {
    if addr.is_empty() {
        return Err(DeployError::Connect("Device address cannot be empty".to_string()));
    }

    let mut backoff = config.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!("Connected to {} after {} attempt(s)", addr, attempt);
                return Ok(stream);
            }
            Err(e) => {
                if let Some(max) = config.max_attempts {
                    if attempt >= max {
                        tracing::error!("Max connection attempts ({}) to {} reached", max, addr);
                        return Err(DeployError::Connect(format!(
                            "Max connection attempts ({}) reached. Last error: {}",
                            max, e
                        )));
                    }
                }

                tracing::warn!(
                    "Connect attempt {} to {} failed: {}, retrying in {:?}",
                    attempt,
                    addr,
                    e,
                    backoff
                );

                sleep(backoff).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

/// Build a `ReconnectConfig` from explicit values
pub fn reconnect_config(
    max_backoff: Duration,
    initial_backoff: Duration,
    max_attempts: Option<usize>,
) -> ReconnectConfig {
    ReconnectConfig {
        max_backoff,
        initial_backoff,
        max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_backoff, Duration::from_secs(2));
        assert_eq!(config.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.max_attempts, Some(3));
    }

    #[test]
    fn test_reconnect_config_custom() {
        let config = reconnect_config(Duration::from_secs(1), Duration::from_millis(100), None);
        assert_eq!(config.max_backoff, Duration::from_secs(1));
        assert_eq!(config.initial_backoff, Duration::from_millis(100));
        assert!(config.max_attempts.is_none());
    }

    #[tokio::test]
    async fn test_empty_address_fails_fast() {
        let err = connect_with_backoff("", &ReconnectConfig::default()).await.unwrap_err();
        assert!(matches!(err, DeployError::Connect(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_exhausts_attempts() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = reconnect_config(Duration::from_millis(20), Duration::from_millis(5), Some(2));
        let err = connect_with_backoff(&addr, &config).await.unwrap_err();
        assert!(matches!(err, DeployError::Connect(ref msg) if msg.contains("(2)")));
    }

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = connect_with_backoff(&addr, &ReconnectConfig::default()).await;
        assert!(stream.is_ok());
    }
}
