//! ACE Token Engine
//!
//! Client-side access token lifecycle and revocation synchronization for
//! clients of constrained resource servers.
//!
//! # Features
//!
//! - Token acquisition from the authorization server (client credentials grant)
//! - Shared token cache keyed by audience and scope
//! - Per-token expiry watchdogs
//! - Token installation at the resource server (`/authz-info`)
//! - Revocation list sync by polling (full or differential) or observation
//! - One access loop per resource server with a denial budget
//!
//! # Example
//!
//! ```rust,ignore
//! use ace_token_engine::{engine_config, DefaultTokenEngine};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = engine_config()
//!         .as_uri("http://localhost:5683")
//!         .resource_server("http://localhost:5685", "rs1", "r_temp r_helloWorld")
//!         .denial_budget(3)
//!         .polling(Duration::from_secs(10))
//!         .build()?;
//!
//!     let report = DefaultTokenEngine::new(config)?.run().await?;
//!     println!("renewals: {}", report.total_renewals());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: tokens, revocation payloads and configuration
//! - `error`: error hierarchy and request classification
//! - `core`: HTTP transport abstraction
//! - `resilience`: reachability checks with backoff
//! - `token`: store, expiry watchdog, acquirer and deployer
//! - `revocation`: polling and observe sources feeding the reconciler
//! - `access`: the per-server access loop state machine
//! - `builders`: fluent configuration builder
//! - `engine`: wiring of all of the above

pub mod access;
pub mod builders;
pub mod core;
pub mod engine;
pub mod error;
pub mod resilience;
pub mod revocation;
pub mod token;
pub mod types;

// Re-export the engine
pub use engine::{create_revocation_source, DefaultTokenEngine, EngineReport, TokenEngine};

// Re-export builders
pub use builders::{engine_config, resource_triplets, validate_address, EngineConfigBuilder};

// Re-export error types
pub use error::{
    ConfigurationError, EngineError, EngineResult, NetworkError, ProtocolError, RequestError,
    StoreError,
};

// Re-export types
pub use types::{
    ClientAuthMethod, EngineConfig, Fingerprint, IssuanceResponse, ResourceServerConfig,
    RevocationMode, RevocationSnapshot, TokenRecord, TrlPayload,
};

// Re-export core
pub use core::{
    create_mock_transport, create_transport, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MockHttpTransport, ReqwestHttpTransport,
};

// Re-export token lifecycle
pub use token::{
    Acquired, Acquirer, Deployer, ExpiryWatchdog, HttpTokenIssuer, TokenIssuer, TokenStore,
    WatchdogSet,
};

// Re-export revocation
pub use revocation::{
    ObserveSource, PollingSource, Reconciler, RevocationSource, RevocationSync, SyncSummary,
};

// Re-export access loop
pub use access::{AccessLoop, LoopExit, LoopSettings, LoopState, ResourceCycle};

// Re-export resilience
pub use resilience::{ReachabilityCheck, RetryConfig};
