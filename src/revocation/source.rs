//! Revocation Sources
//!
//! The single capability both delivery modes share: produce the next
//! revocation payload.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineResult;
use crate::types::TrlPayload;

/// Delivers revocation list payloads.
#[async_trait]
pub trait RevocationSource: Send {
    /// Wait for the next payload.
    ///
    /// `Ok(None)` means the source has ended for good. Errors are transient;
    /// the caller may ask again.
    async fn next_update(&mut self) -> EngineResult<Option<TrlPayload>>;

    /// Short name for logs.
    fn mode(&self) -> &'static str;
}

/// Source fed by an in-process channel, for notifications pushed by an
/// embedding application.
pub struct ChannelSource {
    receiver: mpsc::Receiver<TrlPayload>,
}

#[async_trait]
impl RevocationSource for ChannelSource {
    async fn next_update(&mut self) -> EngineResult<Option<TrlPayload>> {
        Ok(self.receiver.recv().await)
    }

    fn mode(&self) -> &'static str {
        "channel"
    }
}

/// Create a channel-fed source and the sender that drives it.
pub fn channel_source(buffer: usize) -> (mpsc::Sender<TrlPayload>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(buffer);
    (sender, ChannelSource { receiver })
}
