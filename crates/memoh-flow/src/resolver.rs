//! Flow Resolver — the per-turn step loop.
//!
//! Assembles context, drives the LLM ↔ tool loop, runs the inline loop
//! guards, and publishes everything onto the turn's outbound stream. Steps
//! within one session are sequential; separate sessions never share state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use memoh_core::model::{Bot, InboundMessage, MemoryScope, MessageLog};
use memoh_core::types::{Message, ToolCall};
use memoh_providers::traits::{LlmProvider, LlmRequestConfig};
use memoh_tools::registry::ToolRegistry;

use crate::context::ContextBuilder;
use crate::guards::{FingerprintVerdict, LoopGuards};
use crate::inbound::FlowResolver;
use crate::memory::MemoryBridge;
use crate::stream::StreamPublisher;

/// Step cap: the provider's own tool-loop limit, not the resolver's.
const DEFAULT_MAX_STEPS: usize = 20;
/// How much logged history is pulled in before the current turn.
const HISTORY_LIMIT: usize = 50;
/// Memory items kept after dedup-by-id, sorted by score.
const MEMORY_TOP_K: usize = 8;
const MEMORY_SCOPES: [MemoryScope; 3] = [MemoryScope::Chat, MemoryScope::Private, MemoryScope::Public];

const LOOP_WARNING_MARKER: &str = "LOOP_WARNING";

/// Drives one turn end to end: context assembly, the LLM ↔ tool step loop,
/// inline loop guards, and finalization onto the outbound stream.
pub struct StepLoopResolver {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    context: Arc<ContextBuilder>,
    memory: Arc<dyn MemoryBridge>,
    message_log: Arc<dyn MessageLog>,
    request_config: LlmRequestConfig,
    max_steps: usize,
}

impl StepLoopResolver {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        context: Arc<ContextBuilder>,
        memory: Arc<dyn MemoryBridge>,
        message_log: Arc<dyn MessageLog>,
    ) -> Self {
        Self {
            provider,
            tools,
            context,
            memory,
            message_log,
            request_config: LlmRequestConfig::default(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_request_config(mut self, config: LlmRequestConfig) -> Self {
        self.request_config = config;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    async fn load_history(&self, bot_id: uuid::Uuid) -> Vec<Message> {
        let logged = match self.message_log.recent(bot_id, HISTORY_LIMIT).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "failed to load message history, continuing with none");
                Vec::new()
            }
        };
        logged
            .into_iter()
            .filter_map(|entry| match entry.role.as_str() {
                "user" => Some(Message::user(entry.content)),
                "assistant" => Some(Message::assistant(entry.content)),
                _ => None,
            })
            .collect()
    }

    /// Query every memory scope in one call, dedup by id, keep the top-K by
    /// score. Returns `None` if there's nothing worth injecting.
    async fn memory_context(&self, bot_id: uuid::Uuid, query_text: &str) -> Option<String> {
        let items = match self.memory.query(bot_id, &MEMORY_SCOPES, query_text, MEMORY_TOP_K).await {
            Ok(items) => items,
            Err(err) => {
                warn!(%err, "memory query failed, continuing without memory context");
                return None;
            }
        };

        let mut seen = std::collections::HashSet::new();
        let mut deduped: Vec<_> = items.into_iter().filter(|item| seen.insert(item.id.clone())).collect();
        deduped.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        deduped.truncate(MEMORY_TOP_K);

        if deduped.is_empty() {
            return None;
        }

        let lines: Vec<String> = deduped
            .iter()
            .map(|item| format!("- ({:?}) {}", item.scope, item.text))
            .collect();
        Some(format!("## Relevant memory\n\n{}", lines.join("\n")))
    }
}

#[async_trait]
impl FlowResolver for StepLoopResolver {
    async fn resolve(&self, bot: Bot, inbound: InboundMessage, mut publisher: StreamPublisher) {
        if let Err(err) = publisher.started().await {
            warn!(%err, "failed to open outbound stream");
            return;
        }

        let history = self.load_history(bot.id).await;
        let media_paths: Vec<String> = inbound.attachments.iter().map(|a| a.path.clone()).collect();
        let mut messages = self.context.build_messages(
            &history,
            &inbound.text,
            &media_paths,
            inbound.channel_type.as_str(),
            &inbound.target_id,
        );

        if let Some(memory_block) = self.memory_context(bot.id, &inbound.text).await {
            messages.push(Message::system(memory_block));
        }

        let model = bot.memory_model.clone().unwrap_or_else(|| self.provider.default_model().to_string());
        let tool_defs = self.tools.get_definitions();
        let mut guards = LoopGuards::new();

        let mut final_message: Option<String> = None;
        let mut aborted = false;

        for step in 0..self.max_steps {
            debug!(step, bot_id = %bot.id, "resolver step");

            // Prompt invariant: recomputed fresh at every step boundary so
            // mid-session edits to identity/tools documents take effect.
            if let Some(Message::System { content }) = messages.first_mut() {
                *content = self.context.build_system_prompt();
            }

            let response = self.provider.chat(&messages, Some(&tool_defs), &model, &self.request_config).await;

            if let Some(reasoning) = &response.reasoning_content {
                publisher.reasoning_start().await;
                publisher.reasoning_delta(reasoning.clone()).await;
                publisher.reasoning_end().await;
            }

            if response.has_tool_calls() {
                if let Some(text) = &response.content {
                    if !text.is_empty() {
                        if guards.observe_text(text) {
                            warn!(bot_id = %bot.id, step, "n-gram guard aborted step loop");
                            aborted = true;
                        }
                        if let Err(err) = publisher.delta(text.clone(), None).await {
                            warn!(%err, "failed to publish delta");
                        }
                    }
                }

                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(&mut messages, response.content.clone(), tool_calls.clone());

                for call in &tool_calls {
                    let params: HashMap<String, serde_json::Value> = serde_json::from_str(&call.function.arguments).unwrap_or_default();
                    let args_value: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);

                    publisher.tool_call_start(call.id.clone(), call.function.name.clone(), args_value.clone()).await;

                    let verdict = guards.observe_tool_call(&call.function.name, &args_value);

                    info!(tool = %call.function.name, step, "executing tool call");
                    let mut result = self.tools.execute(&call.function.name, params).await;

                    if verdict == FingerprintVerdict::Warn {
                        result.content = format!("{{\"marker\":\"{LOOP_WARNING_MARKER}\"}}\n{}", result.content);
                    }

                    let result_json = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
                    publisher.tool_call_end(call.id.clone(), call.function.name.clone(), result_json).await;

                    ContextBuilder::add_tool_result(&mut messages, &call.id, &result.content);

                    if verdict == FingerprintVerdict::Abort {
                        warn!(bot_id = %bot.id, tool = %call.function.name, "fingerprint guard aborted step loop");
                        aborted = true;
                    }
                }

                if aborted {
                    break;
                }
            } else {
                let text = response.content.unwrap_or_default();
                if !text.is_empty() {
                    if guards.observe_text(&text) {
                        warn!(bot_id = %bot.id, step, "n-gram guard aborted step loop");
                        aborted = true;
                    }
                    if let Err(err) = publisher.delta(text.clone(), None).await {
                        warn!(%err, "failed to publish delta");
                    }
                }
                if !aborted {
                    final_message = Some(text);
                }
                break;
            }
        }

        if aborted {
            if let Err(err) = publisher.error("text loop aborted").await {
                warn!(%err, "failed to error outbound stream");
            }
            return;
        }

        let message = final_message.unwrap_or_else(|| "I reached my step limit without a final answer.".to_string());

        if let Err(err) = publisher.finalize(message).await {
            warn!(%err, "failed to finalize outbound stream");
        }
    }
}
