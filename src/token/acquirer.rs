//! Token Acquisition
//!
//! Client credentials issuance against the authorization server's token
//! endpoint, fronted by a cache lookup in the [`TokenStore`].

use async_trait::async_trait;
use base64::Engine;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::TokenStore;
use super::watchdog::ExpiryWatchdog;
use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{EngineError, EngineResult, ProtocolError};
use crate::types::{ClientAuthMethod, ClientCredentials, Fingerprint, IssuanceResponse, TokenRecord};

/// Token issuance collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Request a token for `audience` and `scope`.
    async fn issue(&self, audience: &str, scope: &str) -> EngineResult<IssuanceResponse>;
}

/// Issuer speaking to an HTTP token endpoint.
pub struct HttpTokenIssuer<T: HttpTransport> {
    transport: Arc<T>,
    token_endpoint: String,
    credentials: ClientCredentials,
    timeout: Duration,
}

impl<T: HttpTransport> HttpTokenIssuer<T> {
    pub fn new(
        transport: Arc<T>,
        token_endpoint: impl Into<String>,
        credentials: ClientCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_endpoint: token_endpoint.into(),
            credentials,
            timeout,
        }
    }

    fn build_request_body(&self, audience: &str, scope: &str) -> String {
        let mut body = url::form_urlencoded::Serializer::new(String::new());
        body.append_pair("grant_type", "client_credentials")
            .append_pair("audience", audience)
            .append_pair("scope", scope);

        if self.credentials.auth_method == ClientAuthMethod::ClientSecretPost {
            body.append_pair("client_id", &self.credentials.client_id);
            if let Some(secret) = &self.credentials.client_secret {
                body.append_pair("client_secret", secret.expose_secret());
            }
        }

        body.finish()
    }

    fn build_request_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        if self.credentials.auth_method == ClientAuthMethod::ClientSecretBasic {
            if let Some(secret) = &self.credentials.client_secret {
                let credentials =
                    format!("{}:{}", self.credentials.client_id, secret.expose_secret());
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                headers.insert("authorization".to_string(), format!("Basic {}", encoded));
            }
        }

        headers
    }
}

#[async_trait]
impl<T: HttpTransport> TokenIssuer for HttpTokenIssuer<T> {
    async fn issue(&self, audience: &str, scope: &str) -> EngineResult<IssuanceResponse> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.token_endpoint.clone(),
            headers: self.build_request_headers(),
            body: Some(self.build_request_body(audience, scope)),
            timeout: Some(self.timeout),
        };

        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(EngineError::issuance_denied(
                audience,
                scope,
                format!("HTTP {}: {}", response.status, response.body),
            ));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            EngineError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }
}

/// Outcome of [`Acquirer::ensure_token`].
#[derive(Debug)]
pub struct Acquired {
    pub fingerprint: Fingerprint,
    /// True when an existing cached token satisfied the request.
    pub cached: bool,
    /// Eviction timer for the caller to own.
    pub watchdog: ExpiryWatchdog,
}

/// Obtains tokens, preferring cached ones.
pub struct Acquirer<I: TokenIssuer> {
    store: Arc<TokenStore>,
    issuer: Arc<I>,
    fallback_lifetime: Duration,
}

impl<I: TokenIssuer> Acquirer<I> {
    pub fn new(store: Arc<TokenStore>, issuer: Arc<I>, fallback_lifetime: Duration) -> Self {
        Self {
            store,
            issuer,
            fallback_lifetime,
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Return a cached token matching `audience`/`scope`, or issue a new one.
    ///
    /// Every outcome arms an expiry watchdog for the caller, so a caller that
    /// cancels its own watchdogs never leaves another caller's token without
    /// one. Any issuance failure is reported as
    /// [`EngineError::IssuanceDenied`] and creates no record.
    pub async fn ensure_token(&self, audience: &str, scope: &str) -> EngineResult<Acquired> {
        if let Some(fingerprint) = self.store.lookup(audience, scope) {
            if let Some(record) = self.store.get(&fingerprint) {
                debug!(audience, scope, fingerprint = %fingerprint, "Token cache hit");
                let watchdog =
                    ExpiryWatchdog::arm(self.store.clone(), fingerprint.clone(), record.expires_at);
                return Ok(Acquired {
                    fingerprint,
                    cached: true,
                    watchdog,
                });
            }
        }

        debug!(audience, scope, "Token cache miss, requesting issuance");

        let response = match self.issuer.issue(audience, scope).await {
            Ok(response) => response,
            Err(e @ EngineError::IssuanceDenied { .. }) => {
                warn!(audience, scope, error = %e, "Token issuance denied");
                return Err(e);
            }
            Err(e) => {
                warn!(audience, scope, error = %e, "Token issuance failed");
                return Err(EngineError::issuance_denied(audience, scope, e.to_string()));
            }
        };

        let now = Instant::now();
        // A hint too large to represent as a deadline is treated as absent.
        let expires_at = response
            .lifetime_hint(chrono::Utc::now().timestamp())
            .and_then(|lifetime| now.checked_add(lifetime))
            .unwrap_or(now + self.fallback_lifetime);
        let granted_scope = response
            .scope
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| scope.to_string());

        let record = TokenRecord::new(audience, granted_scope.clone(), response, expires_at);
        let fingerprint = self.store.insert(record).map_err(|e| {
            warn!(audience, scope, error = %e, "Issued token cannot be cached");
            EngineError::issuance_denied(audience, scope, e.to_string())
        })?;

        info!(
            audience,
            scope = %granted_scope,
            fingerprint = %fingerprint,
            lifetime_secs = expires_at.saturating_duration_since(now).as_secs(),
            "Token issued"
        );

        let watchdog = ExpiryWatchdog::arm(self.store.clone(), fingerprint.clone(), expires_at);
        Ok(Acquired {
            fingerprint,
            cached: false,
            watchdog,
        })
    }
}

/// Mock token issuer for testing.
///
/// Hands out distinct tokens (`mock-token-1`, `mock-token-2`, ...) unless a
/// response or error is queued.
#[derive(Default)]
pub struct MockIssuer {
    request_history: std::sync::Mutex<Vec<(String, String)>>,
    queued: std::sync::Mutex<std::collections::VecDeque<EngineResult<IssuanceResponse>>>,
    issued: std::sync::atomic::AtomicU32,
}

impl MockIssuer {
    /// Create new mock issuer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next issuance.
    pub fn queue_response(&self, response: IssuanceResponse) -> &Self {
        self.lock_queue().push_back(Ok(response));
        self
    }

    /// Queue an error for the next issuance.
    pub fn queue_error(&self, error: EngineError) -> &Self {
        self.lock_queue().push_back(Err(error));
        self
    }

    /// Issuance requests seen so far as (audience, scope).
    pub fn get_request_history(&self) -> Vec<(String, String)> {
        self.request_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_queue(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::VecDeque<EngineResult<IssuanceResponse>>>
    {
        self.queued.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl TokenIssuer for MockIssuer {
    async fn issue(&self, audience: &str, scope: &str) -> EngineResult<IssuanceResponse> {
        self.request_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((audience.to_string(), scope.to_string()));

        if let Some(next) = self.lock_queue().pop_front() {
            return next;
        }

        let n = self
            .issued
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        Ok(IssuanceResponse::new(format!("mock-token-{}", n)))
    }
}

/// Create mock issuer for testing.
pub fn create_mock_issuer() -> MockIssuer {
    MockIssuer::new()
}
