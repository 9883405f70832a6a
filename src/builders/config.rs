//! Configuration Builder
//!
//! Fluent builder for the engine configuration, plus environment loading.

use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, EngineError, EngineResult};
use crate::resilience::RetryConfig;
use crate::types::{
    ClientAuthMethod, ClientCredentials, EngineConfig, ResourceServerConfig, RevocationMode,
    DEFAULT_AS_URI, DEFAULT_AUDIENCE, DEFAULT_DENIAL_BUDGET, DEFAULT_POLLING_INTERVAL,
    DEFAULT_REQUEST_INTERVAL, DEFAULT_RS_URI, DEFAULT_SCOPE, DEFAULT_TIMEOUT,
    DEFAULT_TOKEN_LIFETIME, DEFAULT_TRL_ADDRESS, MAX_TOKEN_LIFETIME,
};

/// Engine configuration builder.
pub struct EngineConfigBuilder {
    as_uri: String,
    client_id: String,
    client_secret: Option<SecretString>,
    auth_method: Option<ClientAuthMethod>,
    resource_servers: Vec<ResourceServerConfig>,
    denial_budget: u32,
    request_interval: Duration,
    revocation: RevocationMode,
    trl_address: String,
    fallback_token_lifetime: Duration,
    timeout: Duration,
    reachability: RetryConfig,
    stop_when_idle: bool,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self {
            as_uri: DEFAULT_AS_URI.to_string(),
            client_id: String::new(),
            client_secret: None,
            auth_method: None,
            resource_servers: Vec::new(),
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

    /// Set authorization server address.
    pub fn as_uri(mut self, uri: impl Into<String>) -> Self {
        self.as_uri = uri.into();
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(client_secret.into()));
        self
    }

    /// Set client authentication method.
    pub fn auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Add a resource server with the audience and scope to request for it.
    pub fn resource_server(
        mut self,
        address: impl Into<String>,
        audience: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        self.resource_servers
            .push(ResourceServerConfig::new(address, audience, scope));
        self
    }

    /// Replace the resource server list.
    pub fn resource_servers(mut self, servers: Vec<ResourceServerConfig>) -> Self {
        self.resource_servers = servers;
        self
    }

    /// Set the number of denials tolerated before renewal.
    pub fn denial_budget(mut self, budget: u32) -> Self {
        self.denial_budget = budget;
        self
    }

    /// Set pacing between two resource requests.
    pub fn request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    /// Poll the revocation list every `interval`.
    pub fn polling(mut self, interval: Duration) -> Self {
        self.revocation = RevocationMode::Poll { interval };
        self
    }

    /// Subscribe to the revocation change feed.
    pub fn observe(mut self) -> Self {
        self.revocation = RevocationMode::Observe;
        self
    }

    /// Set revocation mode.
    pub fn revocation(mut self, mode: RevocationMode) -> Self {
        self.revocation = mode;
        self
    }

    /// Set revocation list path.
    pub fn trl_address(mut self, address: impl Into<String>) -> Self {
        self.trl_address = address.into();
        self
    }

    /// Set lifetime assumed when the issuer gives no expiry hint.
    pub fn fallback_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.fallback_token_lifetime = lifetime;
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set server reachability backoff.
    pub fn reachability(mut self, config: RetryConfig) -> Self {
        self.reachability = config;
        self
    }

    /// Stop revocation sync once every access loop has exited.
    pub fn stop_when_idle(mut self, stop: bool) -> Self {
        self.stop_when_idle = stop;
        self
    }

    /// Build the engine configuration.
    pub fn build(self) -> EngineResult<EngineConfig> {
        let as_uri = validate_address(&self.as_uri)?;

        let mut resource_servers = if self.resource_servers.is_empty() {
            vec![ResourceServerConfig::default()]
        } else {
            self.resource_servers
        };
        for server in &mut resource_servers {
            server.address = validate_address(&server.address)?;
            if server.audience.trim().is_empty() {
                return Err(missing("audience"));
            }
            if server.scope.trim().is_empty() {
                return Err(missing("scope"));
            }
        }

        if self.denial_budget == 0 {
            return Err(invalid("Denial budget must be at least 1"));
        }
        if let RevocationMode::Poll { interval } = self.revocation {
            if interval.is_zero() {
                return Err(invalid("Polling interval must be greater than zero"));
            }
        }
        if self.fallback_token_lifetime.is_zero() {
            return Err(invalid("Token lifetime must be greater than zero"));
        }
        if self.fallback_token_lifetime > MAX_TOKEN_LIFETIME {
            return Err(invalid("Token lifetime must be at most one year"));
        }
        if self.trl_address.trim().is_empty() {
            return Err(missing("trl_address"));
        }

        let auth_method = self.auth_method.unwrap_or(if self.client_secret.is_some() {
            ClientAuthMethod::ClientSecretBasic
        } else {
            ClientAuthMethod::None
        });

        if auth_method != ClientAuthMethod::None {
            if self.client_id.is_empty() {
                return Err(missing("client_id"));
            }
            if self.client_secret.is_none() {
                return Err(missing("client_secret"));
            }
        }

        Ok(EngineConfig {
            as_uri,
            credentials: ClientCredentials {
                client_id: self.client_id,
                client_secret: self.client_secret,
                auth_method,
            },
            resource_servers,
            denial_budget: self.denial_budget,
            request_interval: self.request_interval,
            revocation: self.revocation,
            trl_address: self.trl_address,
            fallback_token_lifetime: self.fallback_token_lifetime,
            timeout: self.timeout,
            reachability: self.reachability,
            stop_when_idle: self.stop_when_idle,
        })
    }
}

impl EngineConfig {
    /// Load configuration from `ACE_*` environment variables.
    ///
    /// Every variable is optional; unset ones keep their defaults.
    pub fn from_env() -> EngineResult<Self> {
        let mut builder = EngineConfigBuilder::new();

        if let Ok(as_uri) = std::env::var("ACE_AS_URI") {
            builder = builder.as_uri(as_uri);
        }
        if let Ok(client_id) = std::env::var("ACE_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Ok(secret) = std::env::var("ACE_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }

        let addresses = env_list("ACE_RS_URI");
        let audiences = env_list("ACE_AUDIENCE");
        let scopes = env_list("ACE_SCOPE");
        if !(addresses.is_empty() && audiences.is_empty() && scopes.is_empty()) {
            builder = builder.resource_servers(resource_triplets(addresses, audiences, scopes)?);
        }

        if let Some(budget) = env_parse::<u32>("ACE_DENIALS")? {
            builder = builder.denial_budget(budget);
        }
        if let Some(secs) = env_parse::<u64>("ACE_REQUEST_INTERVAL")? {
            builder = builder.request_interval(Duration::from_secs(secs));
        }
        if env_flag("ACE_POLLING") {
            builder = builder.polling(DEFAULT_POLLING_INTERVAL);
        }
        if let Some(secs) = env_parse::<u64>("ACE_POLLING_INTERVAL")? {
            builder = builder.polling(Duration::from_secs(secs));
        }
        if env_flag("ACE_OBSERVE") {
            builder = builder.observe();
        }
        if let Ok(trl) = std::env::var("ACE_TRL_ADDRESS") {
            builder = builder.trl_address(trl);
        }
        if let Some(secs) = env_parse::<u64>("ACE_TOKEN_LIFETIME")? {
            builder = builder.fallback_token_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("ACE_TIMEOUT")? {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        builder.build()
    }
}

/// Pair up resource server addresses, audiences and scopes.
///
/// When every list has at most one entry, a missing entry takes its default.
/// Once any list has more than one entry all three must have the same length,
/// and the n-th entries form one server.
pub fn resource_triplets(
    addresses: Vec<String>,
    audiences: Vec<String>,
    scopes: Vec<String>,
) -> EngineResult<Vec<ResourceServerConfig>> {
    let longest = addresses.len().max(audiences.len()).max(scopes.len());

    if longest <= 1 {
        let first = |list: Vec<String>, default: &str| {
            list.into_iter()
                .next()
                .unwrap_or_else(|| default.to_string())
        };
        return Ok(vec![ResourceServerConfig::new(
            first(addresses, DEFAULT_RS_URI),
            first(audiences, DEFAULT_AUDIENCE),
            first(scopes, DEFAULT_SCOPE),
        )]);
    }

    if addresses.len() != longest || audiences.len() != longest || scopes.len() != longest {
        return Err(invalid(
            "When more than one address, audience, or scope is given, \
             the complete list of triplets must be given",
        ));
    }

    Ok(addresses
        .into_iter()
        .zip(audiences)
        .zip(scopes)
        .map(|((address, audience), scope)| ResourceServerConfig::new(address, audience, scope))
        .collect())
}

/// Normalize a server address: `http://` is assumed when no scheme is given,
/// and host and port must both be present.
pub fn validate_address(address: &str) -> EngineResult<String> {
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let invalid_address = |message: &str| {
        EngineError::Configuration(ConfigurationError::InvalidAddress {
            address: address.to_string(),
            message: message.to_string(),
        })
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid_address(&e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid_address("address must have a host part"));
    }
    if url.port().is_none() && !has_explicit_port(&with_scheme) {
        return Err(invalid_address("address must have a port part"));
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}

// `Url` hides ports equal to the scheme default, so look at the raw authority.
fn has_explicit_port(address: &str) -> bool {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> EngineResult<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(&format!("{} is not a valid number: '{}'", name, value))),
        Err(_) => Ok(None),
    }
}

fn missing(field: &str) -> EngineError {
    EngineError::Configuration(ConfigurationError::MissingRequired {
        field: field.to_string(),
    })
}

fn invalid(message: &str) -> EngineError {
    EngineError::Configuration(ConfigurationError::InvalidConfig {
        message: message.to_string(),
    })
}

/// Create a new engine configuration builder.
pub fn engine_config() -> EngineConfigBuilder {
    EngineConfigBuilder::new()
}
