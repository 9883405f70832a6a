//! Token Lifecycle
//!
//! Cache, expiry, acquisition and installation of access tokens.

pub mod acquirer;
pub mod deployer;
pub mod store;
pub mod watchdog;

pub use acquirer::{create_mock_issuer, Acquired, Acquirer, HttpTokenIssuer, MockIssuer, TokenIssuer};
pub use deployer::Deployer;
pub use store::TokenStore;
pub use watchdog::{ExpiryWatchdog, WatchdogSet};
