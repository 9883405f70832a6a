//! Resilience
//!
//! Backoff used to wait for the authorization and resource servers to come up.

pub mod retry;

pub use retry::{ReachabilityCheck, RetryConfig, DEFAULT_RETRY_CONFIG};
