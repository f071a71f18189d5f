//! Inbound Processor — turns a raw channel inbound into a running Flow
//! Resolver session: binding lookup, access policy, message-log
//! persistence, stream opening, handoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use memoh_core::hub::{EventHub, SharedEventHub};
use memoh_core::model::{Bot, BotRepository, ChannelBindingRepository, InboundMessage, LoggedMessage, MessageLog, StreamSession};
use memoh_tools::message::{OutboundSend, SendCallback};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::stream::{StreamEvent, StreamPublisher};

const DEDUP_WINDOW: Duration = Duration::from_secs(300);
const FIXED_POLICY_DENIED_MESSAGE: &str = "This conversation isn't permitted to message this bot.";

/// Seam the Inbound Processor hands a turn to, once binding and policy
/// checks pass and an outbound stream is open.
#[async_trait]
pub trait FlowResolver: Send + Sync {
    async fn resolve(&self, bot: Bot, inbound: InboundMessage, publisher: StreamPublisher);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unbound,
    BotSuspended,
    PolicyDenied,
}

pub enum InboundOutcome {
    /// Accepted: a session is running, consume events off the receiver.
    Accepted(mpsc::Receiver<StreamEvent>),
    /// Within the dedup window of an already-processed transport id.
    Deduplicated,
    Dropped(DropReason),
}

pub struct InboundProcessor {
    bindings: Arc<dyn ChannelBindingRepository>,
    bots: Arc<dyn BotRepository>,
    message_log: Arc<dyn MessageLog>,
    resolver: Arc<dyn FlowResolver>,
    send_callback: Option<SendCallback>,
    seen: Mutex<HashMap<String, chrono::DateTime<Utc>>>,
    /// Fan-out for every turn's `StreamEvent`s. The channel adapter that
    /// opened the turn gets one subscription via `InboundOutcome::Accepted`;
    /// anything else watching the bot (a telemetry sink, a second local
    /// surface) can call `event_hub()` and subscribe independently.
    hub: SharedEventHub<StreamEvent>,
}

impl InboundProcessor {
    pub fn new(
        bindings: Arc<dyn ChannelBindingRepository>,
        bots: Arc<dyn BotRepository>,
        message_log: Arc<dyn MessageLog>,
        resolver: Arc<dyn FlowResolver>,
        send_callback: Option<SendCallback>,
    ) -> Self {
        Self {
            bindings,
            bots,
            message_log,
            resolver,
            send_callback,
            seen: Mutex::new(HashMap::new()),
            hub: Arc::new(EventHub::new()),
        }
    }

    /// The hub every turn's stream events are fanned out through. Subscribe
    /// before a turn starts to observe it alongside the channel adapter
    /// that opened it.
    pub fn event_hub(&self) -> SharedEventHub<StreamEvent> {
        self.hub.clone()
    }

    async fn is_duplicate(&self, inbound: &InboundMessage) -> bool {
        let key = inbound.dedup_key();
        let now = inbound.arrival_time;
        let mut seen = self.seen.lock().await;
        seen.retain(|_, ts| now.signed_duration_since(*ts).to_std().map(|d| d < DEDUP_WINDOW).unwrap_or(true));
        if seen.contains_key(&key) {
            return true;
        }
        seen.insert(key, now);
        false
    }

    /// `identity` is the channel identity this running adapter instance is
    /// bound under (the Channel Manager already knows it from its own
    /// binding table); not the sender's identity within the inbound.
    pub async fn process(&self, bot_id: Uuid, identity: &str, inbound: InboundMessage) -> InboundOutcome {
        if self.is_duplicate(&inbound).await {
            debug!(transport_id = %inbound.transport_id, "dropping duplicate inbound within dedup window");
            return InboundOutcome::Deduplicated;
        }

        let binding = match self.bindings.get(bot_id, inbound.channel_type, identity).await {
            Ok(b) => b,
            Err(_) => {
                warn!(bot_id = %bot_id, identity, "inbound for unknown channel binding, dropping");
                return InboundOutcome::Dropped(DropReason::Unbound);
            }
        };

        let bot = match self.bots.get(bot_id).await {
            Ok(b) if b.is_live() => b,
            _ => {
                debug!(bot_id = %bot_id, "bot suspended or missing, silently dropping inbound");
                return InboundOutcome::Dropped(DropReason::BotSuspended);
            }
        };

        if !binding.capabilities.read {
            self.reply_policy_denied(&inbound).await;
            return InboundOutcome::Dropped(DropReason::PolicyDenied);
        }

        if let Err(err) = self
            .message_log
            .append(LoggedMessage {
                session_id: Uuid::new_v4(),
                bot_id,
                role: "user".into(),
                content: inbound.text.clone(),
                created_at: Utc::now(),
            })
            .await
        {
            warn!(%err, "failed to persist inbound message to log");
        }

        let session = StreamSession::open(bot_id, inbound.channel_type, inbound.target_id.clone(), inbound.reply_reference.clone());
        let (publisher, mut raw_receiver) = StreamPublisher::new(session);

        // Subscribe before the resolver is spawned, so the bridge below
        // can't drop the turn's opening events into a hub with no
        // subscribers yet.
        let caller_rx = self.hub.subscribe().await;
        let hub = self.hub.clone();
        tokio::spawn(async move {
            while let Some(event) = raw_receiver.recv().await {
                hub.publish(event).await;
            }
        });

        let resolver = self.resolver.clone();
        tokio::spawn(async move {
            resolver.resolve(bot, inbound, publisher).await;
        });

        InboundOutcome::Accepted(caller_rx)
    }

    async fn reply_policy_denied(&self, inbound: &InboundMessage) {
        let Some(cb) = &self.send_callback else {
            warn!("policy denied but no send callback configured to notify sender");
            return;
        };
        let msg = OutboundSend {
            channel_type: inbound.channel_type,
            target_id: inbound.target_id.clone(),
            content: FIXED_POLICY_DENIED_MESSAGE.to_string(),
            reply_reference: inbound.reply_reference.clone(),
            attachments: Vec::new(),
        };
        if let Err(err) = cb(msg).await {
            warn!(%err, "failed to send policy-denied reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoh_core::model::{Capabilities, ChannelBinding, ChannelType, InMemoryBotRepository, InMemoryChannelBindingRepository, InMemoryMessageLog};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FlowResolver for RecordingResolver {
        async fn resolve(&self, _bot: Bot, _inbound: InboundMessage, mut publisher: StreamPublisher) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            publisher.started().await.unwrap();
            publisher.finalize("ok").await.unwrap();
        }
    }

    fn make_inbound(transport_id: &str) -> InboundMessage {
        InboundMessage {
            channel_type: ChannelType::LocalCli,
            source_id: "user-1".into(),
            target_id: "direct".into(),
            sender_identity: "user-1".into(),
            text: "hello".into(),
            attachments: vec![],
            reply_reference: None,
            transport_id: transport_id.into(),
            arrival_time: Utc::now(),
        }
    }

    async fn make_processor(resolver: Arc<RecordingResolver>, read_capability: bool) -> (InboundProcessor, Uuid) {
        let bindings = Arc::new(InMemoryChannelBindingRepository::default());
        let bots = Arc::new(InMemoryBotRepository::default());
        let message_log = Arc::new(InMemoryMessageLog::default());

        let bot = Bot::new("test-bot");
        let bot_id = bot.id;
        bots.upsert(bot).await.unwrap();

        bindings
            .upsert(ChannelBinding {
                id: Uuid::new_v4(),
                bot_id,
                channel_type: ChannelType::LocalCli,
                channel_identity: "direct".into(),
                capabilities: Capabilities { read: read_capability, write: true, delete: false },
                credentials: HashMap::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let processor = InboundProcessor::new(bindings, bots, message_log, resolver, None);
        (processor, bot_id)
    }

    #[tokio::test]
    async fn accepts_and_hands_off_to_resolver() {
        let resolver = Arc::new(RecordingResolver { calls: AtomicUsize::new(0) });
        let (processor, bot_id) = make_processor(resolver.clone(), true).await;

        let outcome = processor.process(bot_id, "direct", make_inbound("t1")).await;
        match outcome {
            InboundOutcome::Accepted(mut rx) => {
                let first = rx.recv().await;
                assert!(matches!(first, Some(StreamEvent::Started)));
            }
            _ => panic!("expected accepted outcome"),
        }
    }

    #[tokio::test]
    async fn unknown_binding_is_dropped_as_unbound() {
        let resolver = Arc::new(RecordingResolver { calls: AtomicUsize::new(0) });
        let (processor, _bot_id) = make_processor(resolver, true).await;

        let outcome = processor.process(Uuid::new_v4(), "direct", make_inbound("t2")).await;
        assert!(matches!(outcome, InboundOutcome::Dropped(DropReason::Unbound)));
    }

    #[tokio::test]
    async fn missing_read_capability_is_policy_denied() {
        let resolver = Arc::new(RecordingResolver { calls: AtomicUsize::new(0) });
        let (processor, bot_id) = make_processor(resolver, false).await;

        let outcome = processor.process(bot_id, "direct", make_inbound("t3")).await;
        assert!(matches!(outcome, InboundOutcome::Dropped(DropReason::PolicyDenied)));
    }

    #[tokio::test]
    async fn duplicate_transport_id_within_window_is_deduped() {
        let resolver = Arc::new(RecordingResolver { calls: AtomicUsize::new(0) });
        let (processor, bot_id) = make_processor(resolver, true).await;

        let first = processor.process(bot_id, "direct", make_inbound("dup")).await;
        assert!(matches!(first, InboundOutcome::Accepted(_)));

        let second = processor.process(bot_id, "direct", make_inbound("dup")).await;
        assert!(matches!(second, InboundOutcome::Deduplicated));
    }
}
