//! Revocation Sync
//!
//! Runs the active revocation source and reconciles the token store after
//! every payload until told to stop.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::reconciler::Reconciler;
use super::source::RevocationSource;
use crate::token::TokenStore;

/// Counters reported when the sync task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Payloads received.
    pub updates: u64,
    /// Tokens purged from the store.
    pub purged: u64,
    /// Failed fetches or dropped subscriptions.
    pub errors: u64,
}

/// Drives one revocation source against the token store.
pub struct RevocationSync {
    source: Box<dyn RevocationSource>,
    reconciler: Reconciler,
}

impl RevocationSync {
    pub fn new(source: Box<dyn RevocationSource>, store: Arc<TokenStore>) -> Self {
        Self {
            source,
            reconciler: Reconciler::new(store),
        }
    }

    /// Consume payloads until `shutdown` turns true (or its sender is
    /// dropped) or the source ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SyncSummary {
        let mode = self.source.mode();
        let mut summary = SyncSummary::default();
        info!(mode, "Revocation sync started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                update = self.source.next_update() => match update {
                    Ok(Some(payload)) => {
                        summary.updates += 1;
                        let purged = self.reconciler.apply(&payload);
                        summary.purged += purged.len() as u64;
                    }
                    Ok(None) => {
                        info!(mode, "Revocation source closed");
                        break;
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(mode, error = %e, "Revocation update failed");
                    }
                },
            }
        }

        info!(
            mode,
            updates = summary.updates,
            purged = summary.purged,
            "Revocation sync stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpMethod, HttpResponse, MockHttpTransport};
    use crate::revocation::{channel_source, PollingSource};
    use crate::types::{Fingerprint, IssuanceResponse, TokenRecord, TrlPayload};
    use std::time::Duration;
    use tokio::time::Instant;

    fn cache(store: &TokenStore, token: &str) -> Fingerprint {
        store
            .insert(TokenRecord::new(
                "rs1",
                "r_temp",
                IssuanceResponse::new(token),
                Instant::now() + Duration::from_secs(3600),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_notifications_purge_and_wake() {
        let store = Arc::new(TokenStore::new());
        let fp = cache(&store, "pushed");
        let (sender, source) = channel_source(4);
        let (_stop, shutdown) = watch::channel(false);

        let sync = tokio::spawn(RevocationSync::new(Box::new(source), store.clone()).run(shutdown));

        let waiter = {
            let store = store.clone();
            let fp = fp.clone();
            tokio::spawn(async move {
                store
                    .wait_for(&fp, Instant::now() + Duration::from_secs(3600))
                    .await
            })
        };

        sender
            .send(TrlPayload::Bare(vec![fp.clone()]))
            .await
            .unwrap();
        assert!(!waiter.await.unwrap());
        drop(sender);

        let summary = sync.await.unwrap();
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.purged, 1);
        assert!(!store.contains(&fp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_revocation_visible_within_one_interval() {
        let store = Arc::new(TokenStore::new());
        let fp = cache(&store, "victim");
        let transport = Arc::new(MockHttpTransport::new());
        transport.on(HttpMethod::Get, "http://as/trl", HttpResponse::json(200, &serde_json::json!([])));

        let source = PollingSource::new(
            transport.clone(),
            "http://as/trl",
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();
        let (stop, shutdown) = watch::channel(false);
        let sync = tokio::spawn(RevocationSync::new(Box::new(source), store.clone()).run(shutdown));

        // The list starts reporting the token at t=12s.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(store.contains(&fp));
        transport.on(
            HttpMethod::Get,
            "http://as/trl",
            HttpResponse::json(200, &serde_json::json!([fp.as_str()])),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!store.contains(&fp));

        stop.send(true).unwrap();
        let summary = sync.await.unwrap();
        assert_eq!(summary.purged, 1);
        assert_eq!(summary.updates, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_poller() {
        let store = Arc::new(TokenStore::new());
        let transport = Arc::new(MockHttpTransport::new());
        let source = PollingSource::new(transport.clone(), "http://as/trl", Duration::from_secs(60), Duration::from_secs(1)).unwrap();
        let (stop, shutdown) = watch::channel(false);
        let sync = tokio::spawn(RevocationSync::new(Box::new(source), store).run(shutdown));

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(stop);

        let summary = sync.await.unwrap();
        assert_eq!(summary, SyncSummary::default());
        assert!(transport.get_requests().is_empty());
    }
}
