//! Token Store
//!
//! The single concurrent cache of issued tokens. Every mutation wakes the
//! tasks parked in [`TokenStore::wait_for`]; no I/O ever happens while the
//! lock is held.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{Fingerprint, TokenRecord};

#[derive(Default)]
struct StoreState {
    /// Insertion ordered.
    records: Vec<TokenRecord>,
    /// Fingerprints that were purged and may never come back.
    retired: HashSet<Fingerprint>,
}

impl StoreState {
    fn position(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.records
            .iter()
            .position(|r| &r.fingerprint == fingerprint)
    }

    fn take(&mut self, fingerprint: &Fingerprint) -> bool {
        match self.position(fingerprint) {
            Some(index) => {
                self.records.remove(index);
                self.retired.insert(fingerprint.clone());
                true
            }
            None => false,
        }
    }

    /// Drop records whose deadline has passed. Returns how many went.
    fn prune_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Fingerprint> = self
            .records
            .iter()
            .filter(|r| r.is_expired_at(now))
            .map(|r| r.fingerprint.clone())
            .collect();
        for fingerprint in &expired {
            debug!(fingerprint = %fingerprint, "Expired token pruned");
            self.take(fingerprint);
        }
        expired.len()
    }
}

/// Concurrent token cache keyed by fingerprint.
#[derive(Default)]
pub struct TokenStore {
    state: Mutex<StoreState>,
    changed: Notify,
}

impl TokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock with every expired record already gone, so a record is never
    /// observed past its deadline even when no watchdog guards it anymore.
    fn live(&self) -> MutexGuard<'_, StoreState> {
        let mut state = self.lock();
        if state.prune_expired(Instant::now()) > 0 {
            self.changed.notify_waiters();
        }
        state
    }

    /// First record, in insertion order, whose audience and scope
    /// contain the requested ones.
    pub fn lookup(&self, audience: &str, scope: &str) -> Option<Fingerprint> {
        self.live()
            .records
            .iter()
            .find(|r| r.satisfies(audience, scope))
            .map(|r| r.fingerprint.clone())
    }

    /// Cache a record and return its fingerprint.
    ///
    /// Inserting a fingerprint that is already cached keeps the existing
    /// record. A fingerprint that was purged before is refused.
    pub fn insert(&self, record: TokenRecord) -> Result<Fingerprint, StoreError> {
        let fingerprint = record.fingerprint.clone();
        {
            let mut state = self.live();
            if state.retired.contains(&fingerprint) {
                return Err(StoreError::Retired {
                    fingerprint: fingerprint.to_string(),
                });
            }
            if state.position(&fingerprint).is_none() {
                state.records.push(record);
            }
        }
        debug!(fingerprint = %fingerprint, "Token cached");
        self.changed.notify_waiters();
        Ok(fingerprint)
    }

    /// Set the posted flag. Returns false if the record is absent.
    pub fn mark_posted(&self, fingerprint: &Fingerprint) -> bool {
        let mut state = self.live();
        match state.position(fingerprint) {
            Some(index) => {
                state.records[index].posted = true;
                true
            }
            None => false,
        }
    }

    /// Remove a record and wake every waiter. Removing an absent fingerprint
    /// is a no-op. Returns whether a record was removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.lock().take(fingerprint);
        self.changed.notify_waiters();
        removed
    }

    /// Tombstone every listed fingerprint, cached or not, so none of them
    /// can be inserted later. Returns the ones that were cached.
    pub fn retire_all<'a>(
        &self,
        fingerprints: impl IntoIterator<Item = &'a Fingerprint>,
    ) -> Vec<Fingerprint> {
        let removed: Vec<Fingerprint> = {
            let mut state = self.lock();
            let mut removed = Vec::new();
            for fingerprint in fingerprints {
                if state.take(fingerprint) {
                    removed.push(fingerprint.clone());
                } else {
                    state.retired.insert(fingerprint.clone());
                }
            }
            removed
        };
        if !removed.is_empty() {
            self.changed.notify_waiters();
        }
        removed
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.live().position(fingerprint).is_some()
    }

    /// Copy of a cached record.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<TokenRecord> {
        let state = self.live();
        state
            .position(fingerprint)
            .map(|index| state.records[index].clone())
    }

    /// Fingerprints currently cached, in insertion order.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.live()
            .records
            .iter()
            .map(|r| r.fingerprint.clone())
            .collect()
    }

    /// Whether the fingerprint was purged at some point.
    pub fn is_retired(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().retired.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.live().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live().records.is_empty()
    }

    /// Park until the store changes or `deadline` passes.
    ///
    /// Returns true when woken by a change. Wakeups carry no information
    /// about what changed; callers re-check their own condition.
    pub async fn changed_before(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = self.changed.notified() => true,
            _ = tokio::time::sleep_until(deadline) => false,
        }
    }

    /// Park while `fingerprint` stays cached, at most until `deadline`.
    ///
    /// Returns true if the fingerprint is still present when the deadline
    /// passes, false as soon as it is gone.
    pub async fn wait_for(&self, fingerprint: &Fingerprint, deadline: Instant) -> bool {
        loop {
            // Register interest before checking so a removal racing the
            // check still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.contains(fingerprint) {
                return false;
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => return self.contains(fingerprint),
            }
        }
    }
}
