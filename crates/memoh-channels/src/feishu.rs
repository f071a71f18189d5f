//! Feishu (Lark) channel — webhook events in, REST API out.
//!
//! Feishu bots authenticate REST calls with a short-lived
//! `tenant_access_token` minted from an app id/secret pair, and receive
//! events via an HTTP callback rather than a socket — so unlike Telegram
//! and Discord, this adapter has no `start()` polling loop of its own;
//! inbound events are pushed in through `handle_event()` by whatever owns
//! the webhook HTTP endpoint.
//!
//! Coalescing policy: explicit flush. Deltas only accumulate in memory;
//! nothing is sent to Feishu until `Final` (or an explicit mid-stream
//! flush), since Feishu messages don't support cheap partial edits the
//! way Telegram/Discord do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use memoh_core::model::{ChannelType, InboundMessage};
use memoh_flow::{InboundOutcome, StreamEvent};

use crate::base::{Capabilities, Channel};

const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: tokio::time::Instant,
}

/// Feishu (Lark) bot channel.
pub struct FeishuChannel {
    bot_id: Uuid,
    app_id: String,
    app_secret: String,
    processor: Arc<memoh_flow::InboundProcessor>,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl FeishuChannel {
    pub fn new(bot_id: Uuid, app_id: String, app_secret: String, processor: Arc<memoh_flow::InboundProcessor>) -> Self {
        Self {
            bot_id,
            app_id,
            app_secret,
            processor,
            http: reqwest::Client::builder().timeout(Duration::from_secs(30)).build().expect("failed to create HTTP client"),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.token.lock().await;
            if let Some(t) = cached.as_ref() {
                if t.expires_at > tokio::time::Instant::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        let resp: Value = self
            .http
            .post(format!("{FEISHU_API_BASE}/auth/v3/tenant_access_token/internal"))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await?
            .json()
            .await?;

        let token = resp["tenant_access_token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("feishu token response missing tenant_access_token"))?
            .to_string();
        let expire_secs = resp["expire"].as_u64().unwrap_or(7200);
        let ttl = Duration::from_secs(expire_secs).saturating_sub(TOKEN_REFRESH_MARGIN);

        *self.token.lock().await = Some(CachedToken { token: token.clone(), expires_at: tokio::time::Instant::now() + ttl });
        Ok(token)
    }

    /// Handle a decrypted webhook event payload for a `message` event.
    ///
    /// The webhook HTTP handler is responsible for signature verification
    /// and event decryption before calling this.
    pub async fn handle_event(&self, event: &Value) {
        let event_type = event["header"]["event_type"].as_str().unwrap_or_default();
        if event_type != "im.message.receive_v1" {
            debug!(event_type, "feishu event ignored (not a message event)");
            return;
        }

        let message = &event["event"]["message"];
        let sender_id = event["event"]["sender"]["sender_id"]["open_id"].as_str().unwrap_or_default().to_string();
        let chat_id = message["chat_id"].as_str().unwrap_or_default().to_string();
        let message_id = message["message_id"].as_str().unwrap_or_default().to_string();

        if sender_id.is_empty() || chat_id.is_empty() {
            return;
        }

        let text = match message["message_type"].as_str() {
            Some("text") => serde_json::from_str::<Value>(message["content"].as_str().unwrap_or("{}"))
                .ok()
                .and_then(|v| v["text"].as_str().map(String::from))
                .unwrap_or_default(),
            other => {
                debug!(message_type = ?other, "unsupported feishu message type, ignoring");
                return;
            }
        };

        if text.is_empty() {
            return;
        }

        debug!(sender = %sender_id, chat = %chat_id, "feishu inbound message");

        let inbound = InboundMessage {
            channel_type: ChannelType::Feishu,
            source_id: sender_id.clone(),
            target_id: chat_id.clone(),
            sender_identity: sender_id.clone(),
            text,
            attachments: Vec::new(),
            reply_reference: None,
            transport_id: message_id,
            arrival_time: Utc::now(),
        };

        let outcome = self.processor.process(self.bot_id, &sender_id, inbound).await;
        match outcome {
            InboundOutcome::Accepted(events) => {
                if let Err(e) = self.flush_on_final(&chat_id, events).await {
                    error!(error = %e, "feishu stream delivery failed");
                }
            }
            InboundOutcome::Deduplicated => debug!(chat_id = %chat_id, "duplicate feishu inbound, dropped"),
            InboundOutcome::Dropped(reason) => debug!(chat_id = %chat_id, ?reason, "feishu inbound dropped"),
        }
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(format!("{FEISHU_API_BASE}/im/v1/messages?receive_id_type=chat_id"))
            .bearer_auth(token)
            .json(&json!({
                "receive_id": chat_id,
                "msg_type": "text",
                "content": json!({ "text": text }).to_string(),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("feishu send failed (HTTP {}): {}", status, body));
        }
        Ok(())
    }

    /// Accumulate every delta in memory; only send once, on `Final`.
    async fn flush_on_final(&self, chat_id: &str, mut events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        let mut buffer = String::new();

        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Delta { delta, .. } => buffer.push_str(&delta),
                StreamEvent::Final { message } => {
                    let text = if message.is_empty() { buffer.clone() } else { message };
                    if !text.is_empty() {
                        self.send_text(chat_id, &text).await?;
                    }
                }
                StreamEvent::Error { error } => {
                    warn!(error = %error, "feishu stream errored");
                    self.send_text(chat_id, &format!("⚠️ {error}")).await?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Feishu
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { send: true, react: false, open_stream: true }
    }

    async fn start(&self) -> anyhow::Result<()> {
        // Webhook-driven: nothing to poll. Events arrive via `handle_event`.
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, target_id: &str, text: &str) -> anyhow::Result<()> {
        self.send_text(target_id, text).await
    }

    async fn open_stream(&self, target_id: &str, _reply_reference: Option<&str>, events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        self.flush_on_final(target_id, events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memoh_core::model::{Bot, InboundMessage as CoreInboundMessage, InMemoryBotRepository, InMemoryChannelBindingRepository, InMemoryMessageLog};
    use memoh_flow::{FlowResolver, InboundProcessor, StreamPublisher};
    use serde_json::json;

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

    fn create_test_channel() -> FeishuChannel {
        FeishuChannel::new(Uuid::new_v4(), "app_id".into(), "app_secret".into(), create_processor())
    }

    #[test]
    fn test_channel_type() {
        let ch = create_test_channel();
        assert_eq!(ch.channel_type(), ChannelType::Feishu);
    }

    #[test]
    fn test_capabilities() {
        let ch = create_test_channel();
        let caps = ch.capabilities();
        assert!(caps.send);
        assert!(caps.open_stream);
        assert!(!caps.react);
    }

    #[tokio::test]
    async fn test_handle_event_ignores_non_message() {
        let ch = create_test_channel();
        let event = json!({ "header": { "event_type": "im.chat.member.bot.added_v1" } });
        ch.handle_event(&event).await;
    }

    #[tokio::test]
    async fn test_handle_event_ignores_missing_sender() {
        let ch = create_test_channel();
        let event = json!({
            "header": { "event_type": "im.message.receive_v1" },
            "event": {
                "sender": { "sender_id": {} },
                "message": { "chat_id": "oc_1", "message_id": "om_1", "message_type": "text", "content": "{\"text\":\"hi\"}" }
            }
        });
        ch.handle_event(&event).await;
    }
}
