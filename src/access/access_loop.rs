//! Access Loop
//!
//! Per resource server state machine: acquire a token, install it, then read
//! the granted resources in turn. Authorization denials count toward a
//! budget; exhausting it, or losing the token to expiry or revocation,
//! restarts acquisition for the same audience and scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cycle::ResourceCycle;
use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{classify_resource_status, EngineError, RequestError, StoreError};
use crate::token::{Acquirer, Deployer, TokenIssuer, TokenStore, WatchdogSet};
use crate::types::{EngineConfig, Fingerprint, ResourceServerConfig, TokenRecord};

/// Loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AcquireToken,
    PostToken,
    CycleResources,
    Shutdown,
}

/// Per-loop tuning taken from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub denial_budget: u32,
    pub request_interval: Duration,
    pub timeout: Duration,
}

impl From<&EngineConfig> for LoopSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            denial_budget: config.denial_budget,
            request_interval: config.request_interval,
            timeout: config.timeout,
        }
    }
}

/// How an access loop ended.
#[derive(Debug)]
pub struct LoopExit {
    pub address: String,
    pub audience: String,
    pub scope: String,
    /// The fatal error that stopped the loop.
    pub error: Option<EngineError>,
    /// Acquisitions after the first one.
    pub renewals: u32,
}

/// One access loop bound to a resource server.
pub struct AccessLoop<I: TokenIssuer, T: HttpTransport> {
    server: ResourceServerConfig,
    store: Arc<TokenStore>,
    acquirer: Arc<Acquirer<I>>,
    deployer: Arc<Deployer<T>>,
    transport: Arc<T>,
    settings: LoopSettings,
    state: LoopState,
    active: Option<Fingerprint>,
    denials: u32,
    acquisitions: u32,
    cycle: ResourceCycle,
    watchdogs: WatchdogSet,
    exit: Option<EngineError>,
}

impl<I: TokenIssuer, T: HttpTransport> AccessLoop<I, T> {
    pub fn new(
        server: ResourceServerConfig,
        acquirer: Arc<Acquirer<I>>,
        deployer: Arc<Deployer<T>>,
        transport: Arc<T>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            server,
            store: acquirer.store().clone(),
            acquirer,
            deployer,
            transport,
            settings,
            state: LoopState::AcquireToken,
            active: None,
            denials: 0,
            acquisitions: 0,
            cycle: ResourceCycle::default(),
            watchdogs: WatchdogSet::new(),
            exit: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Consecutive denials seen with the active token.
    pub fn denials(&self) -> u32 {
        self.denials
    }

    pub fn active_fingerprint(&self) -> Option<&Fingerprint> {
        self.active.as_ref()
    }

    pub fn renewals(&self) -> u32 {
        self.acquisitions.saturating_sub(1)
    }

    pub fn pending_watchdogs(&self) -> usize {
        self.watchdogs.pending()
    }

    pub fn server(&self) -> &ResourceServerConfig {
        &self.server
    }

    /// Run one transition and return the new state.
    pub async fn step(&mut self) -> LoopState {
        self.state = match self.state {
            LoopState::AcquireToken => self.acquire().await,
            LoopState::PostToken => self.post().await,
            LoopState::CycleResources => self.cycle_once().await,
            LoopState::Shutdown => LoopState::Shutdown,
        };
        self.state
    }

    /// Step until shutdown.
    pub async fn run(mut self) -> LoopExit {
        info!(
            rs = %self.server.address,
            audience = %self.server.audience,
            scope = %self.server.scope,
            "Access loop started"
        );

        while self.step().await != LoopState::Shutdown {}

        LoopExit {
            renewals: self.renewals(),
            address: self.server.address,
            audience: self.server.audience,
            scope: self.server.scope,
            error: self.exit,
        }
    }

    async fn acquire(&mut self) -> LoopState {
        let result = self
            .acquirer
            .ensure_token(&self.server.audience, &self.server.scope)
            .await;

        match result {
            Ok(acquired) => {
                self.acquisitions += 1;
                self.denials = 0;
                self.active = Some(acquired.fingerprint);
                self.watchdogs.track(acquired.watchdog);
                LoopState::PostToken
            }
            Err(e) => self.shut_down(e),
        }
    }

    async fn post(&mut self) -> LoopState {
        let Some(fingerprint) = self.active.clone() else {
            return LoopState::AcquireToken;
        };

        let result = self.deployer.ensure_posted(&fingerprint, &self.server).await;

        match result {
            Ok(()) => match self.store.get(&fingerprint) {
                Some(record) => {
                    self.cycle.retarget(record.resources());
                    LoopState::CycleResources
                }
                None => self.token_lost(&fingerprint),
            },
            Err(EngineError::Store(StoreError::NotFound { .. })) => self.token_lost(&fingerprint),
            Err(e) => self.shut_down(e),
        }
    }

    async fn cycle_once(&mut self) -> LoopState {
        let Some(fingerprint) = self.active.clone() else {
            return LoopState::AcquireToken;
        };
        let Some(record) = self.store.get(&fingerprint) else {
            return self.token_lost(&fingerprint);
        };

        if let Some(resource) = self.cycle.next_resource() {
            let outcome = self.request_resource(&record, &resource).await;
            match outcome {
                Ok(()) => {}
                Err(RequestError::AuthorizationDenial { status }) => {
                    self.denials += 1;
                    warn!(
                        rs = %self.server.address,
                        resource = %resource,
                        status,
                        denials = self.denials,
                        budget = self.settings.denial_budget,
                        "Resource access denied"
                    );
                    if self.denials >= self.settings.denial_budget {
                        self.store.remove(&fingerprint);
                        self.active = None;
                        info!(
                            audience = %self.server.audience,
                            scope = %self.server.scope,
                            fingerprint = %fingerprint,
                            "Denial budget exhausted, renewing token"
                        );
                        return LoopState::AcquireToken;
                    }
                }
                Err(RequestError::Transient { message }) => {
                    warn!(
                        rs = %self.server.address,
                        resource = %resource,
                        error = %message,
                        "Resource request failed"
                    );
                }
            }
        }

        let deadline = Instant::now() + self.settings.request_interval;
        if self.store.wait_for(&fingerprint, deadline).await {
            LoopState::CycleResources
        } else {
            self.token_lost(&fingerprint)
        }
    }

    async fn request_resource(
        &self,
        record: &TokenRecord,
        resource: &str,
    ) -> Result<(), RequestError> {
        let url = self.server.resource_url(resource);
        let mut headers = HashMap::new();
        headers.insert(
            "authorization".to_string(),
            format!("Bearer {}", record.response.access_token),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        let request = HttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
            body: None,
            timeout: Some(self.settings.timeout),
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RequestError::Transient {
                message: e.to_string(),
            })?;

        debug!(
            rs = %self.server.address,
            resource,
            status = response.status,
            "Resource response"
        );
        classify_resource_status(response.status, &response.body)?;
        info!(resource, body = %response.body, "Resource read");
        Ok(())
    }

    fn token_lost(&mut self, fingerprint: &Fingerprint) -> LoopState {
        info!(
            audience = %self.server.audience,
            scope = %self.server.scope,
            fingerprint = %fingerprint,
            "Active token no longer cached, renewing"
        );
        self.active = None;
        LoopState::AcquireToken
    }

    fn shut_down(&mut self, e: EngineError) -> LoopState {
        let canceled = self.watchdogs.cancel_all();
        error!(
            rs = %self.server.address,
            audience = %self.server.audience,
            scope = %self.server.scope,
            code = e.error_code(),
            error = %e,
            canceled_watchdogs = canceled,
            "Access loop shutting down"
        );
        self.exit = Some(e);
        LoopState::Shutdown
    }
}
