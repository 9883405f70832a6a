//! Revocation List Polling
//!
//! Fetches the revocation list on a fixed interval. An endpoint address with
//! query parameters selects differential queries; without them every poll
//! retrieves the full list.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;
use url::Url;

use super::source::RevocationSource;
use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{ConfigurationError, EngineError, EngineResult, ProtocolError};
use crate::types::TrlPayload;

/// Upper bound on immediate follow-up fetches while the server reports more
/// pending changes.
pub const MAX_FOLLOW_UPS: u32 = 8;

/// Pull-mode revocation source.
pub struct PollingSource<T: HttpTransport> {
    transport: Arc<T>,
    endpoint: Url,
    differential: bool,
    interval: Duration,
    timeout: Duration,
    ticker: Option<Interval>,
    pending_more: bool,
    follow_ups: u32,
}

impl<T: HttpTransport> PollingSource<T> {
    /// Create a source polling `endpoint` every `interval`. The first fetch
    /// happens one interval after the first call to `next_update`.
    pub fn new(
        transport: Arc<T>,
        endpoint: &str,
        interval: Duration,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| ConfigurationError::InvalidAddress {
            address: endpoint.to_string(),
            message: e.to_string(),
        })?;
        if interval.is_zero() {
            return Err(ConfigurationError::InvalidConfig {
                message: "Polling interval must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(Self {
            differential: endpoint.query().is_some(),
            transport,
            endpoint,
            interval,
            timeout,
            ticker: None,
            pending_more: false,
            follow_ups: 0,
        })
    }

    pub fn is_differential(&self) -> bool {
        self.differential
    }

    /// URL of the next query.
    pub fn request_url(&self) -> &str {
        self.endpoint.as_str()
    }

    fn advance_cursor(&mut self, cursor: u64) {
        let kept: Vec<(String, String)> = self
            .endpoint
            .query_pairs()
            .filter(|(key, _)| key != "cursor")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut pairs = self.endpoint.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("cursor", &cursor.to_string());
    }

    async fn fetch(&self) -> EngineResult<TrlPayload> {
        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());

        let request = HttpRequest {
            method: HttpMethod::Get,
            url: self.endpoint.to_string(),
            headers,
            body: None,
            timeout: Some(self.timeout),
        };

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(EngineError::Protocol(ProtocolError::UnexpectedStatus {
                status: response.status,
                body: response.body,
            }));
        }

        TrlPayload::parse(&response.body).map_err(|e| {
            EngineError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }

    async fn wait_for_tick(&mut self) {
        let interval = self.interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;
    }
}

#[async_trait]
impl<T: HttpTransport> RevocationSource for PollingSource<T> {
    async fn next_update(&mut self) -> EngineResult<Option<TrlPayload>> {
        if self.pending_more && self.follow_ups < MAX_FOLLOW_UPS {
            self.follow_ups += 1;
        } else {
            self.follow_ups = 0;
            self.wait_for_tick().await;
        }
        self.pending_more = false;

        let payload = self.fetch().await?;

        if self.differential {
            if let Some(cursor) = payload.cursor() {
                self.advance_cursor(cursor);
            }
            self.pending_more = payload.has_more();
        }

        debug!(
            url = %self.endpoint,
            more = self.pending_more,
            "Revocation list polled"
        );
        Ok(Some(payload))
    }

    fn mode(&self) -> &'static str {
        "poll"
    }
}
