//! Token Installation
//!
//! Installs cached tokens at a resource server's `authz-info` endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::TokenStore;
use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::resilience::ReachabilityCheck;
use crate::types::{Fingerprint, ResourceServerConfig, TokenRecord};

/// Installs tokens at resource servers and records the posted flag.
pub struct Deployer<T: HttpTransport> {
    store: Arc<TokenStore>,
    transport: Arc<T>,
    reachability: ReachabilityCheck<T>,
    timeout: Duration,
}

impl<T: HttpTransport> Deployer<T> {
    pub fn new(
        store: Arc<TokenStore>,
        transport: Arc<T>,
        reachability: ReachabilityCheck<T>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            reachability,
            timeout,
        }
    }

    /// Install `fingerprint` at `server` unless it is already posted.
    ///
    /// A response carrying a confirmation claim is a first install (`POST`
    /// of the whole issuance response); otherwise it updates the existing
    /// security context (`PUT` of the token alone). Any failure leaves the
    /// record unposted and surfaces as [`EngineError::PostFailed`]. A record
    /// that vanished meanwhile surfaces as [`StoreError::NotFound`].
    pub async fn ensure_posted(
        &self,
        fingerprint: &Fingerprint,
        server: &ResourceServerConfig,
    ) -> EngineResult<()> {
        let record = self.store.get(fingerprint).ok_or_else(|| StoreError::NotFound {
            fingerprint: fingerprint.to_string(),
        })?;

        if record.posted {
            debug!(fingerprint = %fingerprint, rs = %server.address, "Token already posted");
            return Ok(());
        }

        self.reachability
            .wait_until_reachable("Resource Server", &server.address)
            .await
            .map_err(|e| EngineError::post_failed(&server.address, e.to_string()))?;

        let endpoint = server.authz_info_endpoint();
        let request = self.build_request(&record, &endpoint)?;
        let method = request.method;

        let response = self.transport.send(request).await.map_err(|e| {
            warn!(rs = %server.address, error = %e, "Token installation failed");
            EngineError::post_failed(&server.address, e.to_string())
        })?;

        if !response.is_success() {
            warn!(
                rs = %server.address,
                status = response.status,
                "Token installation rejected"
            );
            return Err(EngineError::post_failed(
                &server.address,
                format!("HTTP {}: {}", response.status, response.body),
            ));
        }

        if !self.store.mark_posted(fingerprint) {
            return Err(StoreError::NotFound {
                fingerprint: fingerprint.to_string(),
            }
            .into());
        }

        info!(
            rs = %server.address,
            audience = %record.audience,
            fingerprint = %fingerprint,
            method = method.as_str(),
            "Token posted"
        );
        Ok(())
    }

    fn build_request(&self, record: &TokenRecord, endpoint: &str) -> EngineResult<HttpRequest> {
        let (method, body) = if record.response.has_confirmation() {
            (HttpMethod::Post, serde_json::to_string(&record.response))
        } else {
            (
                HttpMethod::Put,
                serde_json::to_string(&serde_json::json!({
                    "access_token": record.response.access_token,
                })),
            )
        };
        let body = body.map_err(|e| {
            EngineError::post_failed(endpoint, format!("Cannot encode token: {}", e))
        })?;

        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        Ok(HttpRequest {
            method,
            url: endpoint.to_string(),
            headers,
            body: Some(body),
            timeout: Some(self.timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpResponse, MockHttpTransport};
    use crate::resilience::RetryConfig;
    use crate::types::IssuanceResponse;
    use tokio::time::Instant;

    const RS: &str = "http://rs.local:5685";
    const AUTHZ_INFO: &str = "http://rs.local:5685/authz-info";

    type Fixture = (
        Arc<TokenStore>,
        Arc<MockHttpTransport>,
        Deployer<MockHttpTransport>,
        Fingerprint,
    );

    fn setup(response: IssuanceResponse) -> Fixture {
        let store = Arc::new(TokenStore::new());
        let fp = store
            .insert(TokenRecord::new(
                "rs1",
                "r_temp",
                response,
                Instant::now() + Duration::from_secs(60),
            ))
            .unwrap();
        let transport = Arc::new(MockHttpTransport::new());
        let reachability = ReachabilityCheck::new(transport.clone(), RetryConfig::disabled(), Duration::from_secs(1));
        let deployer = Deployer::new(store.clone(), transport.clone(), reachability, Duration::from_secs(5));
        (store, transport, deployer, fp)
    }

    fn server() -> ResourceServerConfig {
        ResourceServerConfig::new(RS, "rs1", "r_temp")
    }

    #[tokio::test]
    async fn test_first_install_posts_full_response() {
        let mut response = IssuanceResponse::new("opaque");
        response.cnf = Some(serde_json::json!({"osc": {"id": "AQ"}}));
        let (store, transport, deployer, fp) = setup(response);
        transport.on(HttpMethod::Post, AUTHZ_INFO, HttpResponse::new(201, ""));

        deployer.ensure_posted(&fp, &server()).await.unwrap();

        assert!(store.get(&fp).unwrap().posted);
        let request = transport.get_last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert!(request.body.unwrap().contains("\"cnf\""));
    }

    #[tokio::test]
    async fn test_context_update_puts_token() {
        let (store, transport, deployer, fp) = setup(IssuanceResponse::new("opaque"));
        transport.on(HttpMethod::Put, AUTHZ_INFO, HttpResponse::new(204, ""));

        deployer.ensure_posted(&fp, &server()).await.unwrap();

        assert!(store.get(&fp).unwrap().posted);
        let request = transport.get_last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.body.unwrap(), r#"{"access_token":"opaque"}"#);
    }

    #[tokio::test]
    async fn test_posted_token_is_not_reinstalled() {
        let (store, transport, deployer, fp) = setup(IssuanceResponse::new("opaque"));
        store.mark_posted(&fp);

        deployer.ensure_posted(&fp, &server()).await.unwrap();
        assert!(transport.get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_token_unposted() {
        let (store, transport, deployer, fp) = setup(IssuanceResponse::new("opaque"));
        transport
            .queue_on(HttpMethod::Put, AUTHZ_INFO, HttpResponse::new(500, "boom"))
            .queue_error_on(HttpMethod::Put, AUTHZ_INFO, "refused")
            .on(HttpMethod::Put, AUTHZ_INFO, HttpResponse::new(204, ""));

        let first = deployer.ensure_posted(&fp, &server()).await;
        assert!(matches!(first, Err(EngineError::PostFailed { .. })));
        assert!(!store.get(&fp).unwrap().posted);

        let second = deployer.ensure_posted(&fp, &server()).await;
        assert!(matches!(second, Err(EngineError::PostFailed { .. })));

        deployer.ensure_posted(&fp, &server()).await.unwrap();
        assert!(store.get(&fp).unwrap().posted);
        assert_eq!(transport.requests_to(HttpMethod::Put, AUTHZ_INFO).len(), 3);
    }

    #[tokio::test]
    async fn test_vanished_record_is_not_found() {
        let (store, _transport, deployer, fp) = setup(IssuanceResponse::new("opaque"));
        store.remove(&fp);

        let result = deployer.ensure_posted(&fp, &server()).await;
        assert!(matches!(result, Err(EngineError::Store(StoreError::NotFound { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_is_post_failure() {
        let store = Arc::new(TokenStore::new());
        let fp = store
            .insert(TokenRecord::new(
                "rs1",
                "r_temp",
                IssuanceResponse::new("opaque"),
                Instant::now() + Duration::from_secs(60),
            ))
            .unwrap();
        let transport = Arc::new(MockHttpTransport::new());
        transport.fail_on(HttpMethod::Get, RS, "refused");
        let reachability = ReachabilityCheck::new(
            transport.clone(),
            RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            },
            Duration::from_secs(1),
        );
        let deployer = Deployer::new(store.clone(), transport.clone(), reachability, Duration::from_secs(5));

        let result = deployer.ensure_posted(&fp, &server()).await;
        assert!(matches!(result, Err(EngineError::PostFailed { .. })));
        assert!(transport.requests_to(HttpMethod::Put, AUTHZ_INFO).is_empty());
    }
}
