//! Configuration Types
//!
//! Engine configuration: authorization server, resource servers, pacing,
//! denial budget and revocation delivery mode.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::RetryConfig;

/// Default authorization server address.
pub const DEFAULT_AS_URI: &str = "http://localhost:5683";
/// Default resource server address.
pub const DEFAULT_RS_URI: &str = "http://localhost:5685";
/// Default audience.
pub const DEFAULT_AUDIENCE: &str = "rs1";
/// Default scope.
pub const DEFAULT_SCOPE: &str = "r_temp r_helloWorld";
/// Default denial budget (effectively unbounded).
pub const DEFAULT_DENIAL_BUDGET: u32 = u32::MAX;
/// Default pacing between two resource requests.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(1);
/// Default revocation list polling interval.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);
/// Default revocation list path.
pub const DEFAULT_TRL_ADDRESS: &str = "/trl";
/// Token lifetime assumed when the issuer gives no hint.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(40);
/// Longest fallback token lifetime the builder accepts.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// Authorization server base URI.
    pub as_uri: String,
    /// Client credentials towards the authorization server.
    pub credentials: ClientCredentials,
    /// One access loop runs per entry.
    pub resource_servers: Vec<ResourceServerConfig>,
    /// Consecutive authorization denials tolerated before renewal.
    pub denial_budget: u32,
    /// Pacing between two resource requests at the same server.
    pub request_interval: Duration,
    /// Revocation list delivery mode.
    pub revocation: RevocationMode,
    /// Revocation list path, optionally with diff query parameters.
    pub trl_address: String,
    /// Lifetime assumed when the issuer gives no expiry hint.
    pub fallback_token_lifetime: Duration,
    /// HTTP timeout.
    pub timeout: Duration,
    /// Backoff used while waiting for a server to become reachable.
    pub reachability: RetryConfig,
    /// Stop revocation sync once the last access loop has exited.
    pub stop_when_idle: bool,
}

impl EngineConfig {
    /// Full URL of the token endpoint.
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.as_uri.trim_end_matches('/'))
    }

    /// Full URL of the revocation list endpoint.
    pub fn trl_endpoint(&self) -> String {
        let path = self.trl_address.trim_start_matches('/');
        format!("{}/{}", self.as_uri.trim_end_matches('/'), path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            as_uri: DEFAULT_AS_URI.to_string(),
            credentials: ClientCredentials::default(),
            resource_servers: vec![ResourceServerConfig::default()],
            denial_budget: DEFAULT_DENIAL_BUDGET,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            revocation: RevocationMode::Disabled,
            trl_address: DEFAULT_TRL_ADDRESS.to_string(),
            fallback_token_lifetime: DEFAULT_TOKEN_LIFETIME,
            timeout: DEFAULT_TIMEOUT,
            reachability: RetryConfig::default(),
            stop_when_idle: true,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("as_uri", &self.as_uri)
            .field("credentials", &self.credentials)
            .field("resource_servers", &self.resource_servers)
            .field("denial_budget", &self.denial_budget)
            .field("request_interval", &self.request_interval)
            .field("revocation", &self.revocation)
            .field("trl_address", &self.trl_address)
            .field("fallback_token_lifetime", &self.fallback_token_lifetime)
            .finish()
    }
}

/// One resource server the client accesses, with the token it asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServerConfig {
    /// Base address of the resource server.
    pub address: String,
    /// Audience requested from the authorization server.
    pub audience: String,
    /// Scope requested from the authorization server.
    pub scope: String,
}

impl ResourceServerConfig {
    pub fn new(
        address: impl Into<String>,
        audience: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            audience: audience.into(),
            scope: scope.into(),
        }
    }

    /// Token installation endpoint.
    pub fn authz_info_endpoint(&self) -> String {
        format!("{}/authz-info", self.address.trim_end_matches('/'))
    }

    /// URL of a named resource.
    pub fn resource_url(&self, resource: &str) -> String {
        format!("{}/{}", self.address.trim_end_matches('/'), resource)
    }
}

impl Default for ResourceServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RS_URI, DEFAULT_AUDIENCE, DEFAULT_SCOPE)
    }
}

/// How revoked-token notifications reach the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevocationMode {
    /// No revocation sync.
    Disabled,
    /// Poll the revocation list on a fixed interval.
    Poll { interval: Duration },
    /// Subscribe once to the revocation change feed.
    Observe,
}

impl Default for RevocationMode {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Client credentials for the authorization server.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub auth_method: ClientAuthMethod,
}

impl Default for ClientCredentials {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_method: ClientAuthMethod::None,
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// Client authentication method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// client_id and client_secret in request body.
    ClientSecretPost,
    /// HTTP Basic Authentication header.
    ClientSecretBasic,
    /// No client authentication.
    None,
}
