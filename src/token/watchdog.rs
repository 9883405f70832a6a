//! Expiry Watchdog
//!
//! One-shot timers that evict a cached token once its estimated validity
//! window has elapsed.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use super::store::TokenStore;
use crate::types::Fingerprint;

/// Timer evicting one fingerprint at its deadline.
///
/// Dropping the handle leaves the timer running; only [`cancel`](Self::cancel)
/// stops it.
#[derive(Debug)]
pub struct ExpiryWatchdog {
    fingerprint: Fingerprint,
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl ExpiryWatchdog {
    /// Arm a timer removing `fingerprint` from `store` at `deadline`.
    pub fn arm(store: Arc<TokenStore>, fingerprint: Fingerprint, deadline: Instant) -> Self {
        let fp = fingerprint.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if store.remove(&fp) {
                info!(fingerprint = %fp, "Token expired, evicted from cache");
            }
        });

        Self {
            fingerprint,
            deadline,
            handle,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Stop the timer. No-op once it has fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Watchdogs owned by one access loop.
#[derive(Debug, Default)]
pub struct WatchdogSet {
    watchdogs: Vec<ExpiryWatchdog>,
}

impl WatchdogSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a watchdog. A second pending watchdog for the same fingerprint
    /// is canceled instead of tracked.
    pub fn track(&mut self, watchdog: ExpiryWatchdog) {
        self.watchdogs.retain(|w| !w.is_finished());
        let duplicate = self
            .watchdogs
            .iter()
            .any(|w| w.fingerprint() == watchdog.fingerprint());
        if duplicate {
            watchdog.cancel();
        } else {
            self.watchdogs.push(watchdog);
        }
    }

    /// Cancel every pending watchdog.
    pub fn cancel_all(&mut self) -> usize {
        let pending = self.watchdogs.iter().filter(|w| !w.is_finished()).count();
        for watchdog in self.watchdogs.drain(..) {
            watchdog.cancel();
        }
        pending
    }

    /// Number of watchdogs that have not fired yet.
    pub fn pending(&self) -> usize {
        self.watchdogs.iter().filter(|w| !w.is_finished()).count()
    }
}
