//! Channel Manager — orchestrates channel lifecycle and outbound routing.
//!
//! Responsibilities:
//! - Register adapters, one per `(bot, channel type, identity)` binding
//! - Start/stop all bound adapters concurrently via `tokio::spawn`
//! - Route a turn's outbound stream (or a fixed reply) to the bound adapter
//! - Report binding status

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc::Receiver, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use memoh_core::model::ChannelType;
use memoh_flow::StreamEvent;

use crate::base::Channel;

/// Key identifying one bound adapter: a specific bot talking over a
/// specific channel type to a specific external identity.
pub type BindingKey = (Uuid, ChannelType, String);

/// Manages the lifecycle and outbound routing for all bound chat channels.
///
/// Adapters are registered with `register()`, started concurrently with
/// `start_all()`, and stopped with `stop_all()`. Single-writer discipline
/// per binding: only one adapter instance owns a given key at a time,
/// enforced by `register()` replacing (not stacking) any prior entry.
pub struct ChannelManager {
    bindings: HashMap<BindingKey, Arc<dyn Channel>>,
    shutdown: Arc<Notify>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register an adapter for a binding. Overwrites any previous adapter
    /// registered under the same key.
    pub fn register(&mut self, bot_id: Uuid, identity: impl Into<String>, channel: Arc<dyn Channel>) {
        let key = (bot_id, channel.channel_type(), identity.into());
        info!(bot_id = %key.0, channel = key.1.as_str(), identity = %key.2, "registered channel binding");
        self.bindings.insert(key, channel);
    }

    /// Unregister a binding.
    pub fn unregister(&mut self, bot_id: Uuid, channel_type: ChannelType, identity: &str) -> Option<Arc<dyn Channel>> {
        let removed = self.bindings.remove(&(bot_id, channel_type, identity.to_string()));
        if removed.is_some() {
            info!(bot_id = %bot_id, channel = channel_type.as_str(), identity = %identity, "unregistered channel binding");
        }
        removed
    }

    /// Look up the adapter bound to a key.
    pub fn get(&self, bot_id: Uuid, channel_type: ChannelType, identity: &str) -> Option<&Arc<dyn Channel>> {
        self.bindings.get(&(bot_id, channel_type, identity.to_string()))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Start every bound adapter. Blocks until shutdown is signaled.
    pub async fn start_all(&self) -> Result<()> {
        if self.bindings.is_empty() {
            warn!("no channel bindings registered, nothing to start");
            return Ok(());
        }

        info!(count = self.bindings.len(), "starting channel bindings");

        let mut handles = Vec::new();
        for (key, channel) in &self.bindings {
            let ch = channel.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                info!(bot_id = %key.0, channel = key.1.as_str(), "channel starting");
                if let Err(e) = ch.start().await {
                    error!(bot_id = %key.0, channel = key.1.as_str(), error = %e, "channel start failed");
                }
                info!(bot_id = %key.0, channel = key.1.as_str(), "channel stopped");
            }));
        }

        self.shutdown.notified().await;
        info!("channel manager shutting down");
        Ok(())
    }

    /// Stop every bound adapter.
    pub async fn stop_all(&self) {
        info!("stopping all channel bindings");
        self.shutdown.notify_waiters();
        for (key, channel) in &self.bindings {
            debug!(bot_id = %key.0, channel = key.1.as_str(), "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(bot_id = %key.0, channel = key.1.as_str(), error = %e, "channel stop failed");
            }
        }
        info!("all channel bindings stopped");
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Route a turn's outbound stream to the bound adapter, or error if the
    /// adapter isn't registered or doesn't support streaming.
    pub async fn route_stream(
        &self,
        bot_id: Uuid,
        channel_type: ChannelType,
        identity: &str,
        target_id: &str,
        reply_reference: Option<&str>,
        events: Receiver<StreamEvent>,
    ) -> Result<()> {
        let channel = self
            .get(bot_id, channel_type, identity)
            .ok_or_else(|| anyhow!("no channel bound for {:?}/{}", channel_type, identity))?;

        if !channel.capabilities().open_stream {
            return Err(anyhow!("channel {:?} does not support streaming", channel_type));
        }

        channel.open_stream(target_id, reply_reference, events).await
    }

    /// Deliver a fixed, non-streaming reply to the bound adapter.
    pub async fn route_send(
        &self,
        bot_id: Uuid,
        channel_type: ChannelType,
        identity: &str,
        target_id: &str,
        text: &str,
    ) -> Result<()> {
        let channel = self
            .get(bot_id, channel_type, identity)
            .ok_or_else(|| anyhow!("no channel bound for {:?}/{}", channel_type, identity))?;

        channel.send(target_id, text).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Capabilities;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockChannel {
        channel_type: ChannelType,
        caps: Capabilities,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        send_count: Arc<AtomicUsize>,
    }

    impl MockChannel {
        fn new(channel_type: ChannelType, caps: Capabilities) -> Self {
            Self {
                channel_type,
                caps,
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                send_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl Channel for MockChannel {
        fn channel_type(&self) -> ChannelType {
            self.channel_type
        }

        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _target_id: &str, _text: &str) -> anyhow::Result<()> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
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

    fn send_caps() -> Capabilities {
        Capabilities { send: true, react: false, open_stream: false }
    }

    #[test]
    fn test_new_manager_empty() {
        let mgr = ChannelManager::new();
        assert!(mgr.is_empty());
        assert_eq!(mgr.len(), 0);
    }

    #[test]
    fn test_register_binding() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        let ch = Arc::new(MockChannel::new(ChannelType::Telegram, send_caps()));
        mgr.register(bot_id, "user_1", ch);

        assert_eq!(mgr.len(), 1);
        assert!(mgr.get(bot_id, ChannelType::Telegram, "user_1").is_some());
        assert!(mgr.get(bot_id, ChannelType::Discord, "user_1").is_none());
    }

    #[test]
    fn test_register_overwrites_same_key() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        mgr.register(bot_id, "user_1", Arc::new(MockChannel::new(ChannelType::Telegram, send_caps())));
        mgr.register(bot_id, "user_1", Arc::new(MockChannel::new(ChannelType::Telegram, send_caps())));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_unregister_binding() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        mgr.register(bot_id, "user_1", Arc::new(MockChannel::new(ChannelType::Telegram, send_caps())));
        assert_eq!(mgr.len(), 1);

        let removed = mgr.unregister(bot_id, ChannelType::Telegram, "user_1");
        assert!(removed.is_some());
        assert_eq!(mgr.len(), 0);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        let ch = Arc::new(MockChannel::new(ChannelType::Telegram, send_caps()));
        let stopped = ch.stopped.clone();
        mgr.register(bot_id, "user_1", ch);

        mgr.stop_all().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_route_send_success() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        let ch = Arc::new(MockChannel::new(ChannelType::Telegram, send_caps()));
        let count = ch.send_count.clone();
        mgr.register(bot_id, "user_1", ch);

        mgr.route_send(bot_id, ChannelType::Telegram, "user_1", "chat_1", "hi")
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_send_unbound() {
        let mgr = ChannelManager::new();
        let result = mgr
            .route_send(Uuid::new_v4(), ChannelType::Telegram, "user_1", "chat_1", "hi")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_route_stream_requires_capability() {
        let mut mgr = ChannelManager::new();
        let bot_id = Uuid::new_v4();
        mgr.register(bot_id, "user_1", Arc::new(MockChannel::new(ChannelType::Telegram, send_caps())));

        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let result = mgr
            .route_stream(bot_id, ChannelType::Telegram, "user_1", "chat_1", None, rx)
            .await;
        assert!(result.is_err());
    }
}
