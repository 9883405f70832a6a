//! Revocation Reconciliation
//!
//! Folds revocation payloads into the local snapshot and purges every cached
//! token the snapshot names.

use std::sync::Arc;
use tracing::{debug, info};

use crate::token::TokenStore;
use crate::types::{Fingerprint, RevocationSnapshot, TrlPayload};

/// Keeps the token store consistent with the revocation list.
pub struct Reconciler {
    store: Arc<TokenStore>,
    snapshot: RevocationSnapshot,
}

impl Reconciler {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self {
            store,
            snapshot: RevocationSnapshot::new(),
        }
    }

    /// Fold `payload` into the snapshot, then reconcile. Returns the purged
    /// fingerprints.
    pub fn apply(&mut self, payload: &TrlPayload) -> Vec<Fingerprint> {
        self.snapshot.apply(payload);
        debug!(revoked = self.snapshot.len(), "Revocation snapshot updated");
        self.reconcile()
    }

    /// Remove every cached fingerprint that the snapshot lists as revoked.
    ///
    /// Listed fingerprints that are not cached are retired as well, so a
    /// revoked token issued after this point is refused at insertion instead
    /// of waiting for the next payload.
    pub fn reconcile(&self) -> Vec<Fingerprint> {
        let purged = self.store.retire_all(self.snapshot.iter());
        for fingerprint in &purged {
            info!(fingerprint = %fingerprint, "Token revoked, purged from cache");
        }
        purged
    }

    pub fn snapshot(&self) -> &RevocationSnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::types::{DiffEntry, IssuanceResponse, TokenRecord};
    use std::time::Duration;
    use tokio::time::Instant;

    fn cache(store: &TokenStore, token: &str) -> Fingerprint {
        store
            .insert(TokenRecord::new(
                "rs1",
                "r_temp",
                IssuanceResponse::new(token),
                Instant::now() + Duration::from_secs(60),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_payload_purges_intersection() {
        let store = Arc::new(TokenStore::new());
        let a = cache(&store, "a");
        let b = cache(&store, "b");
        let mut reconciler = Reconciler::new(store.clone());

        let purged = reconciler.apply(&TrlPayload::Full {
            full_set: vec![a.clone(), Fingerprint::from("unknown")],
        });

        assert_eq!(purged, vec![a]);
        assert_eq!(store.fingerprints(), vec![b]);
    }

    #[tokio::test]
    async fn test_diff_payloads_accumulate() {
        let store = Arc::new(TokenStore::new());
        let a = cache(&store, "a");
        let mut reconciler = Reconciler::new(store.clone());

        reconciler.apply(&TrlPayload::Diff {
            diff_set: vec![DiffEntry {
                removed: vec![],
                added: vec![Fingerprint::from("other")],
            }],
            cursor: Some(1),
            more: None,
        });
        assert!(store.contains(&a));

        let purged = reconciler.apply(&TrlPayload::Diff {
            diff_set: vec![DiffEntry {
                removed: vec![],
                added: vec![a.clone()],
            }],
            cursor: Some(2),
            more: None,
        });
        assert_eq!(purged, vec![a]);
        assert_eq!(reconciler.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_token_revoked_before_caching_is_refused() {
        let store = Arc::new(TokenStore::new());
        let mut reconciler = Reconciler::new(store.clone());
        let late = Fingerprint::of(b"late");
        assert!(reconciler.apply(&TrlPayload::Bare(vec![late.clone()])).is_empty());

        let refused = store.insert(TokenRecord::new(
            "rs1",
            "r_temp",
            IssuanceResponse::new("late"),
            Instant::now() + Duration::from_secs(60),
        ));
        assert!(matches!(refused, Err(StoreError::Retired { .. })));
        assert!(store.is_empty());
        assert!(reconciler.reconcile().is_empty());
    }
}
