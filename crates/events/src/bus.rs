//! Publish/subscribe contract and the in-process implementation.
//!
//! [`LocalBus`] is a single `tokio::sync::broadcast` channel carrying
//! `(channel, payload)` pairs; each subscriber keeps the set of channel names
//! it listens to and discards everything else.

use std::collections::HashSet;

use async_trait::async_trait;
use dbforge_core::job::SchemaJob;
use dbforge_core::job_events::{progress_channel, ProgressEvent};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One published payload together with the channel it was sent on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode progress event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publishing side of the bus.
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Fire-and-forget publish to whoever is subscribed right now.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Open an independent subscriber handle (one per client connection).
    async fn subscriber(&self) -> Result<Box<dyn BusSubscriber>, BusError>;
}

/// A subscriber handle. Dropping it releases the underlying resources.
#[async_trait]
pub trait BusSubscriber: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BusError>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BusError>;

    /// Wait for the next message on any subscribed channel.
    ///
    /// Returns `Ok(None)` once the bus has shut down.
    async fn recv(&mut self) -> Result<Option<BusMessage>, BusError>;
}

/// Publish a full snapshot of `job` on its progress channel.
pub async fn publish_snapshot(
    bus: &dyn ProgressBus,
    channel_prefix: &str,
    job: &SchemaJob,
) -> Result<(), BusError> {
    let payload = ProgressEvent::snapshot(job).to_payload()?;
    bus.publish(&progress_channel(channel_prefix, job.id), &payload)
        .await
}

// ---------------------------------------------------------------------------
// LocalBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus.
///
/// Only usable when publishers and subscribers share a process (the API
/// with embedded workers, and tests).
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers skip ahead.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriber handles.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl ProgressBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscriber(&self) -> Result<Box<dyn BusSubscriber>, BusError> {
        Ok(Box::new(LocalSubscriber {
            rx: self.sender.subscribe(),
            channels: HashSet::new(),
        }))
    }
}

struct LocalSubscriber {
    rx: broadcast::Receiver<BusMessage>,
    channels: HashSet<String>,
}

#[async_trait]
impl BusSubscriber for LocalSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BusError> {
        if self.channels.is_empty() {
            // Nothing of interest is buffered yet: start from "now" so
            // earlier messages are never replayed.
            self.rx = self.rx.resubscribe();
        }
        self.channels.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BusError> {
        self.channels.remove(channel);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.channels.contains(&msg.channel) => return Ok(Some(msg)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
