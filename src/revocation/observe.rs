//! Revocation Change Feed
//!
//! Subscribes once to the revocation list's server-sent event stream. Each
//! `data:` event carries one payload; ping events and comments are skipped.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use super::source::RevocationSource;
use crate::error::{EngineError, EngineResult, NetworkError, ProtocolError};
use crate::types::TrlPayload;

/// Delay before re-subscribing after the feed dropped.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Push-mode revocation source.
pub struct ObserveSource {
    client: reqwest::Client,
    endpoint: String,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    /// Bytes of a character split across chunks.
    undecoded: Vec<u8>,
    buffer: String,
    reconnect_delay: Duration,
    subscribed_before: bool,
}

impl ObserveSource {
    /// Create a source for `endpoint`. The subscription is made on the first
    /// call to `next_update`.
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                EngineError::Network(NetworkError::ConnectionFailed {
                    message: format!("Failed to create HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            stream: None,
            undecoded: Vec::new(),
            buffer: String::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            subscribed_before: false,
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    async fn subscribe(&mut self) -> EngineResult<()> {
        if self.subscribed_before {
            tokio::time::sleep(self.reconnect_delay).await;
        }
        self.subscribed_before = true;
        self.undecoded.clear();
        self.buffer.clear();

        let response = self
            .client
            .get(&self.endpoint)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                EngineError::Network(NetworkError::ConnectionFailed {
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Protocol(ProtocolError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            }));
        }

        info!(url = %self.endpoint, "Subscribed to revocation feed");
        self.stream = Some(response.bytes_stream().boxed());
        Ok(())
    }
}

#[async_trait]
impl RevocationSource for ObserveSource {
    async fn next_update(&mut self) -> EngineResult<Option<TrlPayload>> {
        loop {
            if let Some(data) = take_event(&mut self.buffer) {
                debug!(url = %self.endpoint, "Revocation notification received");
                return TrlPayload::parse(&data).map(Some).map_err(|e| {
                    EngineError::Protocol(ProtocolError::InvalidJson {
                        message: e.to_string(),
                    })
                });
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    self.subscribe().await?;
                    continue;
                }
            };

            match stream.next().await {
                Some(Ok(chunk)) => {
                    append_chunk(&mut self.undecoded, &mut self.buffer, &chunk);
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(EngineError::Network(NetworkError::StreamClosed {
                        message: e.to_string(),
                    }));
                }
                None => {
                    self.stream = None;
                    return Err(EngineError::Network(NetworkError::StreamClosed {
                        message: "revocation feed ended".to_string(),
                    }));
                }
            }
        }
    }

    fn mode(&self) -> &'static str {
        "observe"
    }
}

/// Decode `chunk` onto `buffer`. A trailing incomplete character is held
/// in `undecoded` until the next chunk completes it; invalid bytes are
/// replaced.
fn append_chunk(undecoded: &mut Vec<u8>, buffer: &mut String, chunk: &[u8]) {
    undecoded.extend_from_slice(chunk);

    let mut start = 0;
    loop {
        match std::str::from_utf8(&undecoded[start..]) {
            Ok(text) => {
                buffer.push_str(text);
                undecoded.clear();
                return;
            }
            Err(e) => {
                let valid = start + e.valid_up_to();
                // Valid up to `valid` by construction.
                buffer.push_str(&String::from_utf8_lossy(&undecoded[start..valid]));
                match e.error_len() {
                    Some(len) => {
                        buffer.push(char::REPLACEMENT_CHARACTER);
                        start = valid + len;
                    }
                    None => {
                        undecoded.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}

/// Pop complete events off `buffer` until one carries data.
fn take_event(buffer: &mut String) -> Option<String> {
    if buffer.contains("\r\n") {
        *buffer = buffer.replace("\r\n", "\n");
    }
    while let Some(pos) = buffer.find("\n\n") {
        let block = buffer[..pos].to_string();
        buffer.drain(..pos + 2);
        if let Some(data) = event_data(&block) {
            return Some(data);
        }
    }
    None
}

/// Data of one event block, or `None` for pings, comments and empty events.
fn event_data(block: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            if value.trim() == "ping" {
                return None;
            }
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(data_lines.join("\n"))
}
