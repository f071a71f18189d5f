//! Message tool — lets the agent proactively send messages and reactions to
//! channels, with attachments resolved through the bot's media store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use memoh_core::model::ChannelType;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::base::{optional_bool, optional_string, require_string, Tool, ToolResult};

/// An outbound send, resolved and ready for a channel adapter.
#[derive(Clone, Debug)]
pub struct OutboundSend {
    pub channel_type: ChannelType,
    pub target_id: String,
    pub content: String,
    pub reply_reference: Option<String>,
    pub attachments: Vec<String>,
}

/// An emoji reaction add/remove against a prior message.
#[derive(Clone, Debug)]
pub struct OutboundReaction {
    pub channel_type: ChannelType,
    pub target_id: String,
    pub message_reference: String,
    pub emoji: String,
    pub add: bool,
}

pub type SendCallback = Arc<dyn Fn(OutboundSend) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;
pub type ReactCallback = Arc<dyn Fn(OutboundReaction) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Resolves an attachment reference named by a tool call into something a
/// channel adapter can actually send. `/data/media/…` paths already live in
/// the store; other `/data/…` paths are ingested on first use; http(s) URLs
/// pass through untouched.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn resolve(&self, path: &str) -> anyhow::Result<String>;
    async fn ingest(&self, path: &str) -> anyhow::Result<String>;
}

async fn resolve_attachment(store: Option<&Arc<dyn MediaStore>>, raw: &str) -> anyhow::Result<String> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }
    let store = store.ok_or_else(|| anyhow::anyhow!("no media store configured, cannot resolve {raw}"))?;
    if raw.starts_with("/data/media/") {
        store.resolve(raw).await
    } else if raw.starts_with("/data/") {
        store.ingest(raw).await
    } else {
        Err(anyhow::anyhow!("attachment path must live under /data/: {raw}"))
    }
}

fn parse_channel_type(s: &str) -> anyhow::Result<ChannelType> {
    match s {
        "telegram" => Ok(ChannelType::Telegram),
        "discord" => Ok(ChannelType::Discord),
        "feishu" => Ok(ChannelType::Feishu),
        "local-cli" => Ok(ChannelType::LocalCli),
        "local-web" => Ok(ChannelType::LocalWeb),
        other => Err(anyhow::anyhow!("unknown channel type: {other}")),
    }
}

// ─────────────────────────────────────────────
// MessageTool
// ─────────────────────────────────────────────

/// `send` (cross-channel) and `react` (emoji add/remove), sharing the
/// per-interaction default channel/target set by the resolver before each
/// step loop.
pub struct MessageTool {
    send_callback: Option<SendCallback>,
    react_callback: Option<ReactCallback>,
    media_store: Option<Arc<dyn MediaStore>>,
    context: Mutex<(ChannelType, String)>,
}

impl MessageTool {
    pub fn new(send_callback: Option<SendCallback>, react_callback: Option<ReactCallback>, media_store: Option<Arc<dyn MediaStore>>) -> Self {
        Self {
            send_callback,
            react_callback,
            media_store,
            context: Mutex::new((ChannelType::LocalCli, "direct".into())),
        }
    }

    pub async fn set_context(&self, channel_type: ChannelType, target_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel_type, target_id.to_string());
    }

    async fn send(&self, params: &HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let content = require_string(params, "content")?;
        let reply_reference = optional_string(params, "reply_reference");
        let raw_attachments: Vec<String> = params
            .get("attachments")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut attachments = Vec::with_capacity(raw_attachments.len());
        for raw in &raw_attachments {
            attachments.push(resolve_attachment(self.media_store.as_ref(), raw).await?);
        }

        let (channel_type, target_id) = {
            let ctx = self.context.lock().await;
            let channel_type = match optional_string(params, "channel") {
                Some(s) => parse_channel_type(&s)?,
                None => ctx.0,
            };
            let target_id = optional_string(params, "target_id").unwrap_or_else(|| ctx.1.clone());
            (channel_type, target_id)
        };

        debug!(channel = channel_type.as_str(), target_id = %target_id, "sending message via tool");

        let msg = OutboundSend { channel_type, target_id: target_id.clone(), content, reply_reference, attachments };

        match &self.send_callback {
            Some(cb) => cb(msg).await?,
            None => debug!("no send callback configured; message discarded"),
        }

        Ok(ToolResult::ok(format!("Message sent to {}:{target_id}", channel_type.as_str())))
    }

    async fn react(&self, params: &HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let message_reference = require_string(params, "message_reference")?;
        let emoji = require_string(params, "emoji")?;
        let add = if params.contains_key("add") { optional_bool(params, "add") } else { true };

        let (channel_type, target_id) = {
            let ctx = self.context.lock().await;
            let channel_type = match optional_string(params, "channel") {
                Some(s) => parse_channel_type(&s)?,
                None => ctx.0,
            };
            let target_id = optional_string(params, "target_id").unwrap_or_else(|| ctx.1.clone());
            (channel_type, target_id)
        };

        let reaction = OutboundReaction { channel_type, target_id: target_id.clone(), message_reference, emoji: emoji.clone(), add };

        match &self.react_callback {
            Some(cb) => cb(reaction).await?,
            None => debug!("no react callback configured; reaction discarded"),
        }

        let verb = if add { "Added" } else { "Removed" };
        Ok(ToolResult::ok(format!("{verb} {emoji} reaction on {target_id}")))
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message or emoji reaction to a channel. Defaults to the current conversation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["send", "react"], "description": "send (default) or react"},
                "content": {"type": "string", "description": "Message text (send)"},
                "attachments": {"type": "array", "items": {"type": "string"}, "description": "Container paths or http(s) URLs (send)"},
                "reply_reference": {"type": "string", "description": "Message id to reply to (send)"},
                "message_reference": {"type": "string", "description": "Message id to react to (react)"},
                "emoji": {"type": "string", "description": "Emoji to add or remove (react)"},
                "add": {"type": "boolean", "description": "true to add, false to remove (react, default true)"},
                "channel": {"type": "string", "description": "Target channel (optional, defaults to current)"},
                "target_id": {"type": "string", "description": "Target chat/channel id (optional, defaults to current)"}
            },
            "required": []
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        match optional_string(&params, "operation").as_deref() {
            Some("react") => self.react(&params).await,
            _ => self.send(&params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeStore;

    #[async_trait]
    impl MediaStore for FakeStore {
        async fn resolve(&self, path: &str) -> anyhow::Result<String> {
            Ok(format!("resolved:{path}"))
        }
        async fn ingest(&self, path: &str) -> anyhow::Result<String> {
            Ok(format!("ingested:{path}"))
        }
    }

    #[test]
    fn test_tool_definition() {
        let tool = MessageTool::new(None, None, None);
        let def = tool.to_definition();
        assert_eq!(def.function.name, "message");
    }

    #[tokio::test]
    async fn test_set_context() {
        let tool = MessageTool::new(None, None, None);
        tool.set_context(ChannelType::Telegram, "chat_42").await;
        let ctx = tool.context.lock().await;
        assert_eq!(ctx.0, ChannelType::Telegram);
        assert_eq!(ctx.1, "chat_42");
    }

    #[tokio::test]
    async fn test_send_no_callback() {
        let tool = MessageTool::new(None, None, None);
        tool.set_context(ChannelType::Discord, "guild_1").await;
        let mut params = HashMap::new();
        params.insert("content".into(), json!("Hello from agent"));
        let result = tool.execute(params).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "Message sent to discord:guild_1");
    }

    #[tokio::test]
    async fn test_send_with_callback() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let callback: SendCallback = Arc::new(move |_msg| {
            let called = called_clone.clone();
            Box::pin(async move {
                called.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        let tool = MessageTool::new(Some(callback), None, None);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("ping"));
        let result = tool.execute(params).await.unwrap();
        assert!(!result.is_error);
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_missing_content() {
        let tool = MessageTool::new(None, None, None);
        let params = HashMap::new();
        assert!(tool.execute(params).await.is_err());
    }

    #[tokio::test]
    async fn test_react_default_add() {
        let tool = MessageTool::new(None, None, None);
        let mut params = HashMap::new();
        params.insert("operation".into(), json!("react"));
        params.insert("message_reference".into(), json!("msg-1"));
        params.insert("emoji".into(), json!("👍"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.content.starts_with("Added"));
    }

    #[tokio::test]
    async fn test_react_remove() {
        let tool = MessageTool::new(None, None, None);
        let mut params = HashMap::new();
        params.insert("operation".into(), json!("react"));
        params.insert("message_reference".into(), json!("msg-1"));
        params.insert("emoji".into(), json!("👍"));
        params.insert("add".into(), json!(false));
        let result = tool.execute(params).await.unwrap();
        assert!(result.content.starts_with("Removed"));
    }

    #[tokio::test]
    async fn test_send_attachment_passthrough_url() {
        let tool = MessageTool::new(None, None, None);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("see attached"));
        params.insert("attachments".into(), json!(["https://example.com/img.png"]));
        let result = tool.execute(params).await.unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_send_attachment_ingests_data_path() {
        let store: Arc<dyn MediaStore> = Arc::new(FakeStore);
        let tool = MessageTool::new(None, None, Some(store));
        let mut params = HashMap::new();
        params.insert("content".into(), json!("see attached"));
        params.insert("attachments".into(), json!(["/data/uploads/photo.jpg"]));
        let result = tool.execute(params).await.unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_send_attachment_rejects_outside_data() {
        let tool = MessageTool::new(None, None, None);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("bad path"));
        params.insert("attachments".into(), json!(["/etc/passwd"]));
        assert!(tool.execute(params).await.is_err());
    }
}
