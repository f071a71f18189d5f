//! Telegram channel — bot integration via `teloxide`.
//!
//! Features:
//! - Long polling (no webhook/public IP needed)
//! - Text, photo, voice, document handling
//! - Typing indicator while the bot processes
//! - Markdown → Telegram HTML conversion
//! - Allow-list by user ID or username
//! - Commands: /start, /reset, /help
//! - Message splitting for >4096 char responses
//! - `OpenStream`: coalesces deltas, editing the same message every 32
//!   characters or 600 ms, whichever comes first

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MediaKind, MessageKind, ParseMode, UpdateKind};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc::Receiver, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use memoh_core::model::{Attachment, ChannelType, InboundMessage};
use memoh_flow::{InboundOutcome, StreamEvent};

use crate::base::{Capabilities, Channel};
use crate::formatting::{markdown_to_telegram_html, split_message};

/// Telegram message length limit.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Coalescing policy: edit after this many new characters...
const COALESCE_CHARS: usize = 32;
/// ...or after this much time has passed since the last edit, whichever
/// comes first.
const COALESCE_INTERVAL: Duration = Duration::from_millis(600);

/// Callback for voice/audio transcription.
///
/// Receives a file path, returns the transcribed text.
pub type TranscribeFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

// ─────────────────────────────────────────────
// TelegramChannel
// ─────────────────────────────────────────────

/// Telegram bot channel using long polling via `teloxide`.
///
/// Each instance is bound to exactly one bot, matching the Channel
/// Manager's per-`(bot, channel type, identity)` registration model.
pub struct TelegramChannel {
    bot_id: Uuid,
    token: String,
    processor: Arc<memoh_flow::InboundProcessor>,
    allowed_users: Vec<String>,
    transcriber: Option<TranscribeFn>,
    shutdown: Arc<Notify>,
}

impl TelegramChannel {
    pub fn new(
        bot_id: Uuid,
        token: String,
        processor: Arc<memoh_flow::InboundProcessor>,
        allowed_users: Vec<String>,
    ) -> Self {
        Self {
            bot_id,
            token,
            processor,
            allowed_users,
            transcriber: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_transcriber(mut self, transcriber: TranscribeFn) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    async fn try_transcribe(&self, path: &str) -> Option<String> {
        let transcriber = self.transcriber.as_ref()?;
        match transcriber(path.to_string()).await {
            Ok(text) if !text.is_empty() => {
                debug!(path = %path, chars = text.len(), "voice transcribed");
                Some(text)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "voice transcription failed");
                None
            }
        }
    }

    /// Sender ID format: "user_id|username" — matches either part.
    /// Empty allow-list = allow everyone.
    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        if self.allowed_users.iter().any(|u| u == sender_id) {
            return true;
        }
        for part in sender_id.split('|') {
            if !part.is_empty() && self.allowed_users.iter().any(|u| u == part) {
                return true;
            }
        }
        false
    }

    async fn handle_update(&self, bot: &Bot, update: &Update) {
        let message = match &update.kind {
            UpdateKind::Message(msg) => msg,
            _ => return,
        };

        let user = match message.from.as_ref() {
            Some(u) => u,
            None => return,
        };

        let user_id = user.id.0.to_string();
        let username = user.username.as_deref().unwrap_or("").to_string();
        let first_name = user.first_name.clone();
        let sender_id = format!("{user_id}|{username}");
        let chat_id = message.chat.id.0.to_string();

        if !self.is_allowed(&sender_id) {
            warn!(sender = %sender_id, chat = %chat_id, "telegram message from unauthorized user, ignoring");
            return;
        }

        if let Some(text) = message.text() {
            if text.starts_with('/') {
                self.handle_command(bot, message, text, &first_name).await;
                return;
            }
        }

        let mut content_parts: Vec<String> = Vec::new();
        let mut attachments: Vec<Attachment> = Vec::new();

        match &message.kind {
            MessageKind::Common(common) => match &common.media_kind {
                MediaKind::Text(text_msg) => {
                    content_parts.push(text_msg.text.clone());
                }
                MediaKind::Photo(photo) => {
                    if let Some(caption) = &photo.caption {
                        content_parts.push(caption.clone());
                    }
                    if let Some(largest) = photo.photo.last() {
                        match self.download_file(bot, &largest.file.id.0).await {
                            Ok(path) => {
                                content_parts.push(format!("[image: {path}]"));
                                attachments.push(Attachment { mime_type: "application/octet-stream".into(), path, filename: None, size: None });
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to download photo");
                                content_parts.push("[image: download failed]".into());
                            }
                        }
                    }
                }
                MediaKind::Voice(voice) => match self.download_file(bot, &voice.voice.file.id.0).await {
                    Ok(path) => {
                        if let Some(text) = self.try_transcribe(&path).await {
                            content_parts.push(format!("[transcription: {text}]"));
                        } else {
                            content_parts.push(format!("[voice: {path}]"));
                        }
                        attachments.push(Attachment { mime_type: "application/octet-stream".into(), path, filename: None, size: None });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to download voice");
                        content_parts.push("[voice: download failed]".into());
                    }
                },
                MediaKind::Audio(audio) => {
                    if let Some(caption) = &audio.caption {
                        content_parts.push(caption.clone());
                    }
                    match self.download_file(bot, &audio.audio.file.id.0).await {
                        Ok(path) => {
                            if let Some(text) = self.try_transcribe(&path).await {
                                content_parts.push(format!("[transcription: {text}]"));
                            } else {
                                content_parts.push(format!("[audio: {path}]"));
                            }
                            attachments.push(Attachment { mime_type: "application/octet-stream".into(), path, filename: None, size: None });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to download audio");
                            content_parts.push("[audio: download failed]".into());
                        }
                    }
                }
                MediaKind::Document(doc) => {
                    if let Some(caption) = &doc.caption {
                        content_parts.push(caption.clone());
                    }
                    match self.download_file(bot, &doc.document.file.id.0).await {
                        Ok(path) => {
                            content_parts.push(format!("[file: {path}]"));
                            attachments.push(Attachment { mime_type: "application/octet-stream".into(), path, filename: None, size: None });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to download document");
                            content_parts.push("[file: download failed]".into());
                        }
                    }
                }
                _ => {
                    debug!("unsupported media type, ignoring");
                    return;
                }
            },
            _ => return,
        }

        let content = content_parts.join("\n");
        if content.is_empty() {
            return;
        }

        debug!(sender = %sender_id, chat = %chat_id, content_len = content.len(), "telegram inbound message");

        let typing_bot = bot.clone();
        let typing_chat_id = ChatId(message.chat.id.0);
        let typing_shutdown = Arc::new(Notify::new());
        let typing_signal = typing_shutdown.clone();
        let typing_handle = tokio::spawn(async move {
            loop {
                let _ = typing_bot.send_chat_action(typing_chat_id, ChatAction::Typing).await;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(4)) => {}
                    _ = typing_signal.notified() => break,
                }
            }
        });

        let inbound = InboundMessage {
            channel_type: ChannelType::Telegram,
            source_id: sender_id.clone(),
            target_id: chat_id.clone(),
            sender_identity: sender_id.clone(),
            text: content,
            attachments,
            reply_reference: None,
            transport_id: message.id.0.to_string(),
            arrival_time: Utc::now(),
        };

        let outcome = self.processor.process(self.bot_id, &sender_id, inbound).await;
        self.handle_outcome(bot, &chat_id, outcome).await;

        typing_shutdown.notify_waiters();
        typing_handle.abort();
    }

    async fn handle_outcome(&self, bot: &Bot, chat_id: &str, outcome: InboundOutcome) {
        match outcome {
            InboundOutcome::Accepted(events) => {
                if let Err(e) = self.coalesce_stream(bot, chat_id, events).await {
                    error!(error = %e, "telegram stream delivery failed");
                }
            }
            InboundOutcome::Deduplicated => {
                debug!(chat_id = %chat_id, "duplicate telegram inbound, dropped");
            }
            InboundOutcome::Dropped(reason) => {
                debug!(chat_id = %chat_id, ?reason, "telegram inbound dropped");
            }
        }
    }

    async fn handle_command(&self, bot: &Bot, message: &Message, text: &str, first_name: &str) {
        let command = text.split_whitespace().next().unwrap_or("");
        let command = command.split('@').next().unwrap_or(command);
        let chat = message.chat.id;

        match command {
            "/start" => {
                let greeting = format!(
                    "👋 Hi {first_name}! I'm here to help.\n\n\
                     Send me any message and I'll do my best to assist!\n\n\
                     Commands:\n\
                     /help — Show available commands\n\
                     /reset — Clear conversation history"
                );
                let _ = bot.send_message(chat, greeting).await;
            }
            "/help" => {
                let help = "🤖 <b>Commands</b>\n\n\
                     /start — Start the bot\n\
                     /reset — Clear conversation history\n\
                     /help — Show this message\n\n\
                     Just send me text, photos, voice messages, or documents \
                     and I'll process them!";
                let _ = bot.send_message(chat, help).parse_mode(ParseMode::Html).await;
            }
            "/reset" => {
                let _ = bot.send_message(chat, "🔄 Conversation history cleared.").await;
            }
            _ => {
                debug!(command = command, "unknown telegram command");
            }
        }
    }

    async fn download_file(&self, bot: &Bot, file_id: &str) -> anyhow::Result<String> {
        use teloxide::types::FileId;
        let file = bot.get_file(FileId(file_id.to_string())).send().await?;

        let media_dir = memoh_core::utils::get_data_path().join("media");
        std::fs::create_dir_all(&media_dir)?;

        let ext = file.path.rsplit('.').next().map(|e| format!(".{e}")).unwrap_or_default();
        let local_path = media_dir.join(format!("{}{}", file_id.replace('/', "_"), ext));

        let mut dst = tokio::fs::File::create(&local_path).await?;
        let mut stream = bot.download_file_stream(&file.path);
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            dst.write_all(&chunk?).await?;
        }

        info!(path = %local_path.display(), "downloaded telegram file");
        Ok(local_path.display().to_string())
    }

    /// Drain a turn's stream, editing a single sent message in place
    /// every 32 new characters or 600 ms, whichever comes first.
    async fn coalesce_stream(&self, bot: &Bot, chat_id: &str, mut events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        let chat: ChatId = ChatId(chat_id.parse().map_err(|_| anyhow::anyhow!("invalid telegram chat_id: {chat_id}"))?);
        let mut buffer = String::new();
        let mut last_sent_len = 0usize;
        let mut sent_message_id: Option<teloxide::types::MessageId> = None;
        let mut last_edit = tokio::time::Instant::now();

        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Delta { delta, .. } => {
                    buffer.push_str(&delta);
                    let grew_enough = buffer.len().saturating_sub(last_sent_len) >= COALESCE_CHARS;
                    let waited_enough = last_edit.elapsed() >= COALESCE_INTERVAL;
                    if grew_enough || waited_enough {
                        self.flush(bot, chat, &buffer, &mut sent_message_id).await;
                        last_sent_len = buffer.len();
                        last_edit = tokio::time::Instant::now();
                    }
                }
                StreamEvent::Final { message } => {
                    if !message.is_empty() {
                        buffer = message;
                    }
                    self.flush(bot, chat, &buffer, &mut sent_message_id).await;
                }
                StreamEvent::Error { error } => {
                    let _ = bot.send_message(chat, format!("⚠️ {error}")).await;
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn flush(&self, bot: &Bot, chat: ChatId, text: &str, sent_message_id: &mut Option<teloxide::types::MessageId>) {
        if text.is_empty() {
            return;
        }
        let html = markdown_to_telegram_html(text);
        let chunks = split_message(&html, TELEGRAM_MAX_LEN);
        let Some(first) = chunks.first() else { return };

        match sent_message_id {
            Some(id) => {
                let result = bot.edit_message_text(chat, *id, first).parse_mode(ParseMode::Html).await;
                if let Err(e) = result {
                    debug!(error = %e, "telegram edit failed, ignoring (likely unchanged content)");
                }
            }
            None => {
                if let Ok(sent) = bot.send_message(chat, first).parse_mode(ParseMode::Html).await {
                    *sent_message_id = Some(sent.id);
                }
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { send: true, react: false, open_stream: true }
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("starting telegram channel (long polling)");
        let bot = Bot::new(&self.token);

        use teloxide::types::BotCommand;
        let commands = vec![
            BotCommand::new("start", "Start the bot"),
            BotCommand::new("help", "Show available commands"),
            BotCommand::new("reset", "Clear conversation history"),
        ];
        if let Err(e) = bot.set_my_commands(commands).await {
            warn!(error = %e, "failed to set bot commands menu");
        }

        info!("telegram bot connected, polling for updates");
        let mut offset: i32 = 0;

        loop {
            tokio::select! {
                updates = bot.get_updates().offset(offset).timeout(30).send() => {
                    match updates {
                        Ok(updates) => {
                            for update in &updates {
                                offset = (update.id.0 as i32).wrapping_add(1);
                                self.handle_update(&bot, update).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "telegram polling error");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("telegram channel shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping telegram channel");
        self.shutdown.notify_waiters();
        Ok(())
    }

    async fn send(&self, target_id: &str, text: &str) -> anyhow::Result<()> {
        let bot = Bot::new(&self.token);
        let chat_id: i64 = target_id.parse().map_err(|_| anyhow::anyhow!("invalid telegram chat_id: {target_id}"))?;

        let html = markdown_to_telegram_html(text);
        let chunks = split_message(&html, TELEGRAM_MAX_LEN);

        for chunk in &chunks {
            let result = bot.send_message(ChatId(chat_id), chunk).parse_mode(ParseMode::Html).await;
            if let Err(e) = result {
                debug!(error = %e, "HTML send failed, retrying as plain text");
                let plain_chunks = split_message(text, TELEGRAM_MAX_LEN);
                for plain_chunk in &plain_chunks {
                    let _ = bot.send_message(ChatId(chat_id), plain_chunk).await;
                }
                return Ok(());
            }
        }

        debug!(chat_id = chat_id, "telegram message sent");
        Ok(())
    }

    async fn open_stream(&self, target_id: &str, _reply_reference: Option<&str>, events: Receiver<StreamEvent>) -> anyhow::Result<()> {
        let bot = Bot::new(&self.token);
        self.coalesce_stream(&bot, target_id, events).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

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

    fn create_test_channel() -> TelegramChannel {
        TelegramChannel::new(Uuid::new_v4(), "test_token".into(), create_processor(), vec![])
    }

    fn create_restricted_channel() -> TelegramChannel {
        TelegramChannel::new(
            Uuid::new_v4(),
            "test_token".into(),
            create_processor(),
            vec!["123456".into(), "johndoe".into()],
        )
    }

    #[test]
    fn test_channel_type() {
        let ch = create_test_channel();
        assert_eq!(ch.channel_type(), ChannelType::Telegram);
    }

    #[test]
    fn test_is_allowed_empty_list() {
        let ch = create_test_channel();
        assert!(ch.is_allowed("anyone"));
        assert!(ch.is_allowed("123|user"));
    }

    #[test]
    fn test_is_allowed_by_id() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("123456|someuser"));
    }

    #[test]
    fn test_is_allowed_by_username() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("999999|johndoe"));
    }

    #[test]
    fn test_is_allowed_denied() {
        let ch = create_restricted_channel();
        assert!(!ch.is_allowed("999999|stranger"));
    }

    #[test]
    fn test_is_allowed_exact_match() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("123456"));
    }

    #[test]
    fn test_is_allowed_pipe_split() {
        let ch = create_restricted_channel();
        assert!(ch.is_allowed("123456|unknown"));
        assert!(ch.is_allowed("000|johndoe"));
        assert!(!ch.is_allowed("000|unknown"));
    }
}
