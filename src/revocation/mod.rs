//! Revocation Synchronization
//!
//! Pull and push delivery of the revocation list, both feeding the same
//! reconciliation against the token store.

pub mod observe;
pub mod poll;
pub mod reconciler;
pub mod source;
pub mod sync;

pub use observe::ObserveSource;
pub use poll::PollingSource;
pub use reconciler::Reconciler;
pub use source::{channel_source, ChannelSource, RevocationSource};
pub use sync::{RevocationSync, SyncSummary};
