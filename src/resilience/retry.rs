//! Reachability Backoff
//!
//! Exponential backoff with jitter used while waiting for a server to answer
//! before talking to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{EngineError, EngineResult, NetworkError};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of reachability attempts. Zero skips the check entirely.
    pub max_attempts: u32,
    /// Initial delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 10,
    initial_delay: Duration::from_millis(200),
    max_delay: Duration::from_secs(5),
    multiplier: 2.0,
    jitter: 0.1,
};

impl RetryConfig {
    /// Configuration that never checks reachability.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..DEFAULT_RETRY_CONFIG
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Waits until a server answers any HTTP request.
pub struct ReachabilityCheck<T: HttpTransport> {
    transport: Arc<T>,
    config: RetryConfig,
    timeout: Duration,
}

impl<T: HttpTransport> ReachabilityCheck<T> {
    pub fn new(transport: Arc<T>, config: RetryConfig, timeout: Duration) -> Self {
        Self {
            transport,
            config,
            timeout,
        }
    }

    /// Poll `url` until it answers. Returns the number of attempts made.
    ///
    /// Any HTTP status counts as reachable; only transport failures retry.
    pub async fn wait_until_reachable(&self, server: &str, url: &str) -> EngineResult<u32> {
        if self.config.max_attempts == 0 {
            return Ok(0);
        }

        for attempt in 0..self.config.max_attempts {
            debug!(server, url, attempt = attempt + 1, "Probing server");

            let request = HttpRequest {
                method: HttpMethod::Get,
                url: url.to_string(),
                headers: HashMap::new(),
                body: None,
                timeout: Some(self.timeout),
            };

            match self.transport.send(request).await {
                Ok(_) | Err(EngineError::Protocol(_)) => {
                    info!(server, url, "Server is reachable");
                    return Ok(attempt + 1);
                }
                Err(e) => {
                    if attempt + 1 < self.config.max_attempts {
                        let delay = self.config.delay_for(attempt);
                        debug!(server, error = %e, delay_ms = delay.as_millis() as u64, "Server not reachable yet");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(server, url, attempts = self.config.max_attempts, "Server unreachable");
        Err(EngineError::Network(NetworkError::Unreachable {
            server: server.to_string(),
            attempts: self.config.max_attempts,
        }))
    }
}
