//! Local-CLI / Local-Web channel — in-process, no network transport.
//!
//! Backed by a `tokio::sync::mpsc` pair the CLI REPL or a WebSocket layer
//! drains directly, instead of a remote API. Every delta is pushed to the
//! subscriber as soon as it arrives — there's no coalescing policy to
//! apply when the consumer is already in-process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use memoh_core::model::{Attachment, ChannelType, InboundMessage};
use memoh_flow::{InboundOutcome, StreamEvent};

use crate::base::{Capabilities, Channel};

/// One local event delivered to whatever is driving this channel (a CLI
/// REPL loop or a WebSocket connection handler).
#[derive(Debug, Clone)]
pub enum LocalEvent {
    Stream(StreamEvent),
    Text(String),
}

/// In-process channel for local CLI and local web UIs.
///
/// Unlike the networked adapters, nothing here owns a long-running I/O
/// loop: `start()`/`stop()` are no-ops, and inbound turns are fed in
/// directly via `submit()` by whatever embeds this channel.
pub struct LocalChannel {
    bot_id: Uuid,
    channel_type: ChannelType,
    processor: Arc<memoh_flow::InboundProcessor>,
    outbound: Sender<LocalEvent>,
    shutdown: Arc<Notify>,
}

impl LocalChannel {
    /// `channel_type` must be `LocalCli` or `LocalWeb`.
    pub fn new(bot_id: Uuid, channel_type: ChannelType, processor: Arc<memoh_flow::InboundProcessor>, outbound: Sender<LocalEvent>) -> Self {
        Self { bot_id, channel_type, processor, outbound, shutdown: Arc::new(Notify::new()) }
    }

    /// Feed a single turn of user input into the Inbound Processor.
    ///
    /// `identity` is the local session/connection identity this channel
    /// instance is bound under.
    pub async fn submit(&self, identity: &str, target_id: &str, text: &str, attachments: Vec<Attachment>) {
        let inbound = InboundMessage {
            channel_type: self.channel_type,
            source_id: identity.to_string(),
            target_id: target_id.to_string(),
            sender_identity: identity.to_string(),
            text: text.to_string(),
            attachments,
            reply_reference: None,
            transport_id: Uuid::new_v4().to_string(),
            arrival_time: Utc::now(),
        };

        let outcome = self.processor.process(self.bot_id, identity, inbound).await;
        self.handle_outcome(outcome).await;
    }

    async fn handle_outcome(&self, outcome: InboundOutcome) {
        match outcome {
            InboundOutcome::Accepted(events) => {
                if let Err(e) = self.push_every_delta(events).await {
                    debug!(error = %e, "local channel stream delivery failed");
                }
            }
            InboundOutcome::Deduplicated => {
                debug!("duplicate local inbound, dropped");
            }
            InboundOutcome::Dropped(reason) => {
                debug!(?reason, "local inbound dropped");
            }
        }
    }

    /// Forward every `StreamEvent` to the consumer as it arrives — no
    /// coalescing, since the consumer is already in-process.
    async fn push_every_delta(&self, mut events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        while let Some(event) = events.recv().await {
            self.outbound.send(LocalEvent::Stream(event)).await.map_err(|_| anyhow::anyhow!("local channel outbound receiver dropped"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { send: true, react: false, open_stream: true }
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!(channel = self.channel_type.as_str(), "local channel ready (no I/O loop to run)");
        self.shutdown.notified().await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, _target_id: &str, text: &str) -> anyhow::Result<()> {
        self.outbound
            .send(LocalEvent::Text(text.to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("local channel outbound receiver dropped"))
    }

    async fn open_stream(&self, _target_id: &str, _reply_reference: Option<&str>, events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        self.push_every_delta(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memoh_core::model::{Bot, InboundMessage as CoreInboundMessage, InMemoryBotRepository, InMemoryChannelBindingRepository, InMemoryMessageLog};
    use memoh_flow::{FlowResolver, InboundProcessor, StreamPublisher};

    struct NoopResolver;

    #[async_trait]
    impl FlowResolver for NoopResolver {
        async fn resolve(&self, _bot: Bot, _inbound: CoreInboundMessage, _publisher: StreamPublisher) {}
    }

    fn create_processor() -> Arc<InboundProcessor> {
        Arc::new(InboundProcessor::new(
            Arc::new(InMemoryChannelBindingRepository::default()),
            Arc::new(InMemoryBotRepository::default()),
            Arc::new(InMemoryMessageLog::default()),
            Arc::new(NoopResolver),
            None,
        ))
    }

    #[test]
    fn test_channel_type_cli() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let ch = LocalChannel::new(Uuid::new_v4(), ChannelType::LocalCli, create_processor(), tx);
        assert_eq!(ch.channel_type(), ChannelType::LocalCli);
    }

    #[test]
    fn test_channel_type_web() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let ch = LocalChannel::new(Uuid::new_v4(), ChannelType::LocalWeb, create_processor(), tx);
        assert_eq!(ch.channel_type(), ChannelType::LocalWeb);
    }

    #[test]
    fn test_capabilities() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let ch = LocalChannel::new(Uuid::new_v4(), ChannelType::LocalCli, create_processor(), tx);
        let caps = ch.capabilities();
        assert!(caps.send);
        assert!(caps.open_stream);
        assert!(!caps.react);
    }

    #[tokio::test]
    async fn test_send_forwards_text() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let ch = LocalChannel::new(Uuid::new_v4(), ChannelType::LocalCli, create_processor(), tx);
        ch.send("session_1", "hello").await.unwrap();

        match rx.recv().await.unwrap() {
            LocalEvent::Text(t) => assert_eq!(t, "hello"),
            _ => panic!("expected text event"),
        }
    }

    #[tokio::test]
    async fn test_submit_unbound_is_dropped_silently() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let ch = LocalChannel::new(Uuid::new_v4(), ChannelType::LocalCli, create_processor(), tx);
        ch.submit("session_1", "session_1", "hi", vec![]).await;
    }
}
