//! Channel trait — the abstract interface every chat channel must implement.
//!
//! Each channel exposes a capability set (plain `send`, `react`, and
//! `open_stream`) and, for channels that support streaming, an
//! `open_stream` entry point that drains a turn's `StreamEvent`s and applies
//! the channel's own coalescing policy (Discord's 2 s edit throttle,
//! Telegram's 32-char/600 ms coalescing, etc.).

use async_trait::async_trait;
use memoh_core::model::ChannelType;
use memoh_flow::StreamEvent;
use tokio::sync::mpsc::Receiver;

/// What a channel adapter is able to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub send: bool,
    pub react: bool,
    pub open_stream: bool,
}

/// Every chat channel implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` per `(bot, channel type,
/// identity)` binding and orchestrates start/stop/send/open_stream across
/// all bound adapters.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Which transport this adapter speaks.
    fn channel_type(&self) -> ChannelType;

    /// What this adapter instance supports.
    fn capabilities(&self) -> Capabilities;

    /// Start listening for incoming messages.
    ///
    /// This should be a long-running task that publishes `InboundMessage`s
    /// to the Inbound Processor. It runs until `stop()` is called or the
    /// shutdown signal is received.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown — stop listening and clean up resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver a single fixed-text, non-streaming reply.
    ///
    /// Used for the Inbound Processor's `PolicyDenied` fixed message, and
    /// by anything else that needs to reply without opening a stream.
    async fn send(&self, target_id: &str, text: &str) -> anyhow::Result<()>;

    /// React to a previously delivered message. Only called when
    /// `capabilities().react` is true; the default is a no-op so adapters
    /// without reaction support don't need to implement it.
    async fn react(&self, target_id: &str, reply_reference: &str, emoji: &str) -> anyhow::Result<()> {
        let _ = (target_id, reply_reference, emoji);
        Ok(())
    }

    /// Drain one turn's outbound stream and apply this channel's
    /// coalescing policy. Only called when `capabilities().open_stream` is
    /// true.
    async fn open_stream(
        &self,
        target_id: &str,
        reply_reference: Option<&str>,
        events: Receiver<StreamEvent>,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// A mock channel for testing.
    struct MockChannel {
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        sent: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                sent: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn channel_type(&self) -> ChannelType {
            ChannelType::LocalCli
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities { send: true, react: false, open_stream: false }
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _target_id: &str, text: &str) -> anyhow::Result<()> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }

        async fn open_stream(
            &self,
            _target_id: &str,
            _reply_reference: Option<&str>,
            _events: Receiver<StreamEvent>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mock_channel_type() {
        let ch = MockChannel::new();
        assert_eq!(ch.channel_type(), ChannelType::LocalCli);
    }

    #[tokio::test]
    async fn test_mock_channel_start() {
        let ch = MockChannel::new();
        ch.start().await.unwrap();
        assert!(ch.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mock_channel_stop() {
        let ch = MockChannel::new();
        ch.stop().await.unwrap();
        assert!(ch.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mock_channel_send() {
        let ch = MockChannel::new();
        ch.send("chat_1", "Hello!").await.unwrap();

        let sent = ch.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], "Hello!");
    }
}
