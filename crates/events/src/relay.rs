//! Per-connection bridge between a client and the progress bus.
//!
//! A relay owns exactly one [`BusSubscriber`] and follows at most one job
//! channel at a time. Clients drive it with control messages:
//!
//! ```text
//! -> {"type":"subscribe","jobId":"<uuid>"}
//! <- {"type":"subscribed","channel":"schema:progress:<uuid>"}
//! <- {"type":"progress", ...job snapshot...}
//! ```
//!
//! The stream supplements polling; a client that needs the authoritative
//! state reads the job record after subscribing.

use dbforge_core::job_events::{
    progress_channel, MSG_TYPE_ERROR, MSG_TYPE_SUBSCRIBE, MSG_TYPE_SUBSCRIBED,
};
use dbforge_core::types::JobId;
use serde::Deserialize;
use serde_json::json;

use crate::bus::{BusError, BusSubscriber};

/// Inbound control message.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "jobId")]
    job_id: Option<String>,
}

pub struct ProgressRelay {
    subscriber: Box<dyn BusSubscriber>,
    channel_prefix: String,
    current: Option<String>,
}

impl ProgressRelay {
    pub fn new(subscriber: Box<dyn BusSubscriber>, channel_prefix: impl Into<String>) -> Self {
        Self {
            subscriber,
            channel_prefix: channel_prefix.into(),
            current: None,
        }
    }

    /// The channel currently followed, if any.
    pub fn current_channel(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the reply to send back, or `None` for well-formed messages of
    /// a type the relay does not act on.
    pub async fn handle_control(&mut self, text: &str) -> Option<String> {
        let msg: ControlMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return Some(error_reply("Invalid message")),
        };

        if msg.kind != MSG_TYPE_SUBSCRIBE {
            return None;
        }

        let Some(job_id) = msg.job_id.as_deref().and_then(|s| s.parse::<JobId>().ok()) else {
            return Some(error_reply("Invalid message"));
        };

        match self.switch_to(job_id).await {
            Ok(channel) => Some(
                json!({ "type": MSG_TYPE_SUBSCRIBED, "channel": channel }).to_string(),
            ),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Progress subscription failed");
                Some(error_reply("Subscription failed"))
            }
        }
    }

    /// Wait for the next payload on the current channel, verbatim.
    ///
    /// Returns `Ok(None)` when the bus has shut down. Messages still in
    /// flight for a previous channel are discarded.
    pub async fn next_payload(&mut self) -> Result<Option<String>, BusError> {
        loop {
            let Some(msg) = self.subscriber.recv().await? else {
                return Ok(None);
            };
            if self.current.as_deref() == Some(msg.channel.as_str()) {
                return Ok(Some(msg.payload));
            }
        }
    }

    /// Unsubscribe and release the bus handle.
    pub async fn close(mut self) {
        if let Some(channel) = self.current.take() {
            if let Err(e) = self.subscriber.unsubscribe(&channel).await {
                tracing::debug!(channel = %channel, error = %e, "Unsubscribe on close failed");
            }
        }
    }

    async fn switch_to(&mut self, job_id: JobId) -> Result<String, BusError> {
        if let Some(previous) = self.current.take() {
            self.subscriber.unsubscribe(&previous).await?;
        }
        let channel = progress_channel(&self.channel_prefix, job_id);
        self.subscriber.subscribe(&channel).await?;
        self.current = Some(channel.clone());
        Ok(channel)
    }
}

fn error_reply(message: &str) -> String {
    json!({ "type": MSG_TYPE_ERROR, "message": message }).to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::bus::{LocalBus, ProgressBus};

    use super::*;

    const PREFIX: &str = "schema:progress:";

    async fn relay(bus: &LocalBus) -> ProgressRelay {
        ProgressRelay::new(bus.subscriber().await.unwrap(), PREFIX)
    }

    fn subscribe_msg(id: JobId) -> String {
        json!({ "type": "subscribe", "jobId": id.to_string() }).to_string()
    }

    async fn next_soon(relay: &mut ProgressRelay) -> Option<String> {
        tokio::time::timeout(Duration::from_millis(100), relay.next_payload())
            .await
            .ok()
            .and_then(|r| r.unwrap())
    }

    #[tokio::test]
    async fn subscribe_acknowledges_with_channel() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;
        let id = uuid::Uuid::new_v4();

        let reply = relay.handle_control(&subscribe_msg(id)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();

        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["channel"], format!("{PREFIX}{id}"));
        assert_eq!(relay.current_channel(), Some(format!("{PREFIX}{id}").as_str()));
    }

    #[tokio::test]
    async fn forwards_payload_verbatim() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;
        let id = uuid::Uuid::new_v4();
        relay.handle_control(&subscribe_msg(id)).await;

        let payload = r#"{"type":"progress","progress":15}"#;
        bus.publish(&progress_channel(PREFIX, id), payload).await.unwrap();

        assert_eq!(next_soon(&mut relay).await.as_deref(), Some(payload));
    }

    #[tokio::test]
    async fn resubscribe_switches_channels() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;
        let first = uuid::Uuid::new_v4();
        let second = uuid::Uuid::new_v4();

        relay.handle_control(&subscribe_msg(first)).await;
        relay.handle_control(&subscribe_msg(second)).await;

        bus.publish(&progress_channel(PREFIX, first), "old").await.unwrap();
        bus.publish(&progress_channel(PREFIX, second), "new").await.unwrap();

        assert_eq!(next_soon(&mut relay).await.as_deref(), Some("new"));
        assert!(next_soon(&mut relay).await.is_none());
    }

    #[tokio::test]
    async fn garbage_gets_error_reply() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;

        let reply = relay.handle_control("not json").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Invalid message");
    }

    #[tokio::test]
    async fn subscribe_without_valid_job_id_is_rejected() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;

        for msg in [r#"{"type":"subscribe"}"#, r#"{"type":"subscribe","jobId":"x"}"#] {
            let reply = relay.handle_control(msg).await.unwrap();
            assert!(reply.contains("\"error\""), "{msg} -> {reply}");
        }
        assert!(relay.current_channel().is_none());
    }

    #[tokio::test]
    async fn unknown_message_types_are_ignored() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;
        assert!(relay.handle_control(r#"{"type":"ping"}"#).await.is_none());
    }

    #[tokio::test]
    async fn close_releases_bus_handle() {
        let bus = LocalBus::default();
        let mut relay = relay(&bus).await;
        relay.handle_control(&subscribe_msg(uuid::Uuid::new_v4())).await;
        assert_eq!(bus.subscriber_count(), 1);

        relay.close().await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
