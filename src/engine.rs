//! Token Engine
//!
//! Wires the token store, acquisition, installation, revocation sync and one
//! access loop per resource server into a single runnable instance.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::access::{AccessLoop, LoopExit, LoopSettings};
use crate::core::{create_transport, HttpTransport, ReqwestHttpTransport};
use crate::error::EngineResult;
use crate::resilience::ReachabilityCheck;
use crate::revocation::{ObserveSource, PollingSource, RevocationSource, RevocationSync, SyncSummary};
use crate::token::{Acquirer, Deployer, HttpTokenIssuer, TokenIssuer, TokenStore};
use crate::types::{EngineConfig, RevocationMode};

/// Outcome of a finished engine run.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// One entry per access loop, in completion order.
    pub loops: Vec<LoopExit>,
    /// Present when revocation sync ran.
    pub revocation: Option<SyncSummary>,
}

impl EngineReport {
    /// Renewals across all loops.
    pub fn total_renewals(&self) -> u32 {
        self.loops.iter().map(|l| l.renewals).sum()
    }

    /// Whether every loop stopped on a fatal error.
    pub fn all_failed(&self) -> bool {
        !self.loops.is_empty() && self.loops.iter().all(|l| l.error.is_some())
    }
}

/// Production engine type.
pub type DefaultTokenEngine = TokenEngine<HttpTokenIssuer<ReqwestHttpTransport>, ReqwestHttpTransport>;

/// An engine instance. Owns the shared token store; nothing is global.
pub struct TokenEngine<I: TokenIssuer, T: HttpTransport> {
    config: EngineConfig,
    store: Arc<TokenStore>,
    transport: Arc<T>,
    issuer: Arc<I>,
    revocation: Option<Box<dyn RevocationSource>>,
}

impl DefaultTokenEngine {
    /// Create an engine talking HTTP to the configured servers.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let transport = Arc::new(create_transport(Some(config.timeout))?);
        let issuer = Arc::new(HttpTokenIssuer::new(
            transport.clone(),
            config.token_endpoint(),
            config.credentials.clone(),
            config.timeout,
        ));
        let revocation = create_revocation_source(&config, transport.clone())?;
        Ok(Self::with_components(config, transport, issuer, revocation))
    }
}

impl<I, T> TokenEngine<I, T>
where
    I: TokenIssuer + 'static,
    T: HttpTransport + 'static,
{
    /// Create an engine from explicit collaborators.
    pub fn with_components(
        config: EngineConfig,
        transport: Arc<T>,
        issuer: Arc<I>,
        revocation: Option<Box<dyn RevocationSource>>,
    ) -> Self {
        Self {
            config,
            store: Arc::new(TokenStore::new()),
            transport,
            issuer,
            revocation,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared token store.
    pub fn store(&self) -> Arc<TokenStore> {
        self.store.clone()
    }

    /// Run every access loop to completion.
    ///
    /// Fails only if the authorization server never becomes reachable. Loop
    /// failures are reported in the returned [`EngineReport`].
    pub async fn run(self) -> EngineResult<EngineReport> {
        let Self {
            config,
            store,
            transport,
            issuer,
            revocation,
        } = self;

        ReachabilityCheck::new(transport.clone(), config.reachability.clone(), config.timeout)
            .wait_until_reachable("Authorization Server", &config.as_uri)
            .await?;

        let (stop_sync, sync_shutdown) = watch::channel(false);
        let sync = revocation.map(|source| {
            tokio::spawn(RevocationSync::new(source, store.clone()).run(sync_shutdown))
        });

        let acquirer = Arc::new(Acquirer::new(
            store.clone(),
            issuer,
            config.fallback_token_lifetime,
        ));
        let deployer = Arc::new(Deployer::new(
            store.clone(),
            transport.clone(),
            ReachabilityCheck::new(transport.clone(), config.reachability.clone(), config.timeout),
            config.timeout,
        ));
        let settings = LoopSettings::from(&config);

        let mut loops = JoinSet::new();
        for server in config.resource_servers.iter().cloned() {
            let access = AccessLoop::new(
                server,
                acquirer.clone(),
                deployer.clone(),
                transport.clone(),
                settings,
            );
            loops.spawn(access.run());
        }

        let mut exits = Vec::with_capacity(config.resource_servers.len());
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => error!(error = %e, "Access loop task failed"),
            }
        }
        info!(loops = exits.len(), "All access loops ended");

        let revocation = match sync {
            Some(handle) => {
                if config.stop_when_idle {
                    let _ = stop_sync.send(true);
                }
                match handle.await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        error!(error = %e, "Revocation sync task failed");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(EngineReport {
            loops: exits,
            revocation,
        })
    }
}

/// Build the revocation source the configuration asks for.
pub fn create_revocation_source<T: HttpTransport + 'static>(
    config: &EngineConfig,
    transport: Arc<T>,
) -> EngineResult<Option<Box<dyn RevocationSource>>> {
    let source: Box<dyn RevocationSource> = match config.revocation {
        RevocationMode::Disabled => return Ok(None),
        RevocationMode::Poll { interval } => Box::new(PollingSource::new(
            transport,
            &config.trl_endpoint(),
            interval,
            config.timeout,
        )?),
        RevocationMode::Observe => {
            Box::new(ObserveSource::new(config.trl_endpoint(), config.timeout)?)
        }
    };
    Ok(Some(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::engine_config;
    use crate::core::{HttpMethod, HttpResponse, MockHttpTransport};
    use crate::error::{EngineError, NetworkError};
    use crate::resilience::RetryConfig;
    use crate::token::MockIssuer;
    use crate::types::{Fingerprint, IssuanceResponse};
    use std::time::Duration;

    const AS: &str = "http://as.local:5683";
    const RS: &str = "http://rs.local:5685";

    fn config(mode: RevocationMode) -> EngineConfig {
        engine_config()
            .as_uri(AS)
            .resource_server(RS, "rs1", "r_temp r_helloWorld")
            .revocation(mode)
            .reachability(RetryConfig::disabled())
            .build()
            .unwrap()
    }

    fn rs_routes(transport: &MockHttpTransport) {
        transport
            .on(HttpMethod::Put, "http://rs.local:5685/authz-info", HttpResponse::new(204, ""))
            .on(HttpMethod::Get, "http://rs.local:5685/temp", HttpResponse::new(200, "21.5"))
            .on(HttpMethod::Get, "http://rs.local:5685/helloWorld", HttpResponse::new(200, "hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_revocation_forces_renewal() {
        let config = config(RevocationMode::Poll {
            interval: Duration::from_secs(5),
        });
        let transport = Arc::new(MockHttpTransport::new());
        rs_routes(&transport);
        let revoked = Fingerprint::of(b"first");
        transport.on(
            HttpMethod::Get,
            "http://as.local:5683/trl",
            HttpResponse::json(200, &serde_json::json!({"full_set": [revoked.as_str()]})),
        );

        let issuer = Arc::new(MockIssuer::new());
        issuer
            .queue_response(IssuanceResponse::new("first"))
            .queue_error(EngineError::issuance_denied("rs1", "r_temp r_helloWorld", "HTTP 403"));

        let source = create_revocation_source(&config, transport.clone()).unwrap();
        let engine = TokenEngine::with_components(config, transport, issuer.clone(), source);
        let store = engine.store();

        let report = engine.run().await.unwrap();

        assert_eq!(report.loops.len(), 1);
        assert!(matches!(report.loops[0].error, Some(EngineError::IssuanceDenied { .. })));
        assert_eq!(report.loops[0].renewals, 0);
        assert_eq!(report.revocation.unwrap().purged, 1);
        assert_eq!(issuer.get_request_history().len(), 2);
        assert!(store.is_retired(&revoked));
        assert!(report.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_independently() {
        let config = engine_config()
            .as_uri(AS)
            .resource_server(RS, "rs1", "r_temp")
            .resource_server("http://rs2.local:5686", "rs2", "r_lock")
            .reachability(RetryConfig::disabled())
            .build()
            .unwrap();
        let transport = Arc::new(MockHttpTransport::new());
        rs_routes(&transport);
        transport.on(
            HttpMethod::Put,
            "http://rs2.local:5686/authz-info",
            HttpResponse::new(500, "no"),
        );

        let issuer = Arc::new(MockIssuer::new());
        issuer
            .queue_response(IssuanceResponse::new("for-rs1"))
            .queue_response(IssuanceResponse::new("for-rs2"));

        let engine = TokenEngine::with_components(config, transport.clone(), issuer, None);
        let store = engine.store();
        let run = tokio::spawn(engine.run());

        // rs2's loop shuts down on the failed install; rs1 keeps cycling.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!run.is_finished());
        assert!(store.contains(&Fingerprint::of(b"for-rs1")));
        assert!(transport.requests_to(HttpMethod::Get, "http://rs.local:5685/temp").len() >= 10);
        run.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_authorization_server() {
        let config = engine_config()
            .as_uri(AS)
            .reachability(RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            })
            .build()
            .unwrap();
        let transport = Arc::new(MockHttpTransport::new());
        transport.fail_on(HttpMethod::Get, AS, "refused");

        let engine =
            TokenEngine::with_components(config, transport, Arc::new(MockIssuer::new()), None);
        let result = engine.run().await;

        assert!(matches!(
            result,
            Err(EngineError::Network(NetworkError::Unreachable { attempts: 2, .. }))
        ));
    }

    #[test]
    fn test_disabled_revocation_builds_no_source() {
        let config = config(RevocationMode::Disabled);
        let transport = Arc::new(MockHttpTransport::new());
        assert!(create_revocation_source(&config, transport).unwrap().is_none());
    }

    #[test]
    fn test_report_totals() {
        let report = EngineReport::default();
        assert_eq!(report.total_renewals(), 0);
        assert!(!report.all_failed());
    }
}
