//! `memoh serve` — wire up a single bot's full runtime: tools, provider,
//! container sandbox, channel adapters, and MCP health checks, then block
//! until shutdown.
//!
//! Persistence is backed by `memoh_core::model::InMemoryStore` — a real
//! deployment swaps in a relational store and vector index behind the same
//! repository traits. The sandbox runtime is `FakeRuntime`; a containerd
//! build supplies its own `Runtime` impl.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use memoh_channels::base::Channel;
use memoh_channels::manager::ChannelManager;
use memoh_containers::{ContainerManager, ContainerManagerConfig, FakeRuntime};
use memoh_core::config::Config;
use memoh_core::model::{Bot, Capabilities as BindingCapabilities, ChannelBinding, ChannelType, InMemoryStore, McpConnection};
use memoh_core::utils::bot_data_dir;
use memoh_flow::{ContextBuilder, InMemoryMemoryBridge, InboundProcessor, StepLoopResolver};
use memoh_mcp::wire::McpContentBlock;
use memoh_mcp::McpConnectionService;
use memoh_providers::create_provider;
use memoh_tools::base::{Tool, ToolResult};
use memoh_tools::container_fs::{ContainerEditTool, ContainerExecTool, ContainerListTool, ContainerReadTool, ContainerWriteTool};
use memoh_tools::memory_tool::{MemorySearch, MemoryTool};
use memoh_tools::message::{MessageTool, OutboundSend, SendCallback};
use memoh_tools::registry::ToolRegistry;
use memoh_tools::web::{WebFetchTool, WebSearchTool};

/// Single channel identity standalone `serve` binds every adapter under —
/// there's no per-external-user partitioning at the binding layer here.
const CHANNEL_IDENTITY: &str = "primary";

/// Adapts the in-memory bridge to the `MemorySearch` seam `MemoryTool`
/// expects, scoped to one bot.
struct BridgeMemorySearch {
    bot_id: Uuid,
    bridge: Arc<InMemoryMemoryBridge>,
}

#[async_trait::async_trait]
impl MemorySearch for BridgeMemorySearch {
    async fn search(
        &self,
        _bot_id: Uuid,
        query: &str,
        scopes: &[memoh_core::model::MemoryScope],
        limit: usize,
    ) -> memoh_core::Result<Vec<memoh_core::model::MemoryItem>> {
        self.bridge.query(self.bot_id, scopes, query, limit).await
    }
}

/// One federated MCP tool, bound to the connection it was discovered on.
/// `execute` dispatches `tools/call` against the connection's transport
/// with the connection's local (unprefixed) tool name, not the federated
/// one the LLM sees.
struct McpFederatedTool {
    service: Arc<McpConnectionService>,
    conn: McpConnection,
    local_name: String,
    federated_name: String,
    description: String,
    parameters: serde_json::Value,
}

#[async_trait::async_trait]
impl Tool for McpFederatedTool {
    fn name(&self) -> &str {
        &self.federated_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(&self, params: std::collections::HashMap<String, serde_json::Value>) -> anyhow::Result<ToolResult> {
        let arguments = serde_json::Value::Object(params.into_iter().collect());
        let raw = self
            .service
            .call_tool(&self.conn, &self.local_name, arguments)
            .await
            .map_err(|e| anyhow::anyhow!(e.message))?;

        let result: memoh_mcp::wire::CallToolResult = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("malformed tools/call result: {e}"))),
        };

        let text = result
            .content
            .iter()
            .filter_map(|block| match block {
                McpContentBlock::Text { text } => Some(text.clone()),
                McpContentBlock::Image { mime_type, .. } => Some(format!("[image: {mime_type}]")),
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            Ok(ToolResult::error(text))
        } else {
            Ok(ToolResult::ok(text))
        }
    }
}

/// Lists tools on every active MCP connection for the bot and registers one
/// `McpFederatedTool` per descriptor. The descriptor's name comes back
/// already federated (`list_tools` applies `federated_tool_name`); the
/// local name dispatched to `tools/call` is recovered by stripping that
/// same prefix back off.
async fn federate_mcp_tools(service: &Arc<McpConnectionService>, bot_id: Uuid, tools: &mut ToolRegistry) {
    let connections = match service.list_active_by_bot(bot_id).await {
        Ok(conns) => conns,
        Err(e) => {
            warn!(error = %e, "failed to list mcp connections for tool federation");
            return;
        }
    };

    for conn in connections {
        let descriptors = match service.list_tools(&conn).await {
            Ok(d) => d,
            Err(e) => {
                warn!(connection = %conn.name, error = %e, "failed to list tools on mcp connection");
                continue;
            }
        };

        let prefix = format!("{}.", conn.sanitized_name());
        for descriptor in descriptors {
            let local_name = descriptor.name.strip_prefix(prefix.as_str()).unwrap_or(&descriptor.name).to_string();
            tools.register(Arc::new(McpFederatedTool {
                service: service.clone(),
                conn: conn.clone(),
                local_name,
                federated_name: descriptor.name.clone(),
                description: descriptor.description,
                parameters: descriptor.input_schema,
            }));
            info!(tool = %descriptor.name, connection = %conn.name, "federated mcp tool registered");
        }
    }
}

/// Everything a command needs to drive one bot: its identity, the
/// repositories backing it, the Inbound Processor turns are fed through,
/// and the (initially empty) Channel Manager adapters register into.
pub struct BotRuntime {
    pub bot: Bot,
    pub store: InMemoryStore,
    pub processor: Arc<InboundProcessor>,
    pub channel_manager: Arc<RwLock<ChannelManager>>,
    pub mcp_service: Arc<McpConnectionService>,
}

/// Build one bot's tool/provider/container/resolver stack. Shared by
/// `serve` (networked channels) and `chat` (a single Local-CLI channel).
pub async fn build_runtime(config: &Config) -> Result<BotRuntime> {
    let store = InMemoryStore::default();

    let bot = Bot::new("Assistant");
    let bot_id = bot.id;
    store.bots.upsert(bot.clone()).await?;
    info!(bot_id = %bot_id, "bot created");

    let host_data_path = bot_data_dir(bot_id);
    std::fs::create_dir_all(&host_data_path)?;

    // Constructed empty and shared now; populated once channel adapters
    // exist below. They, in turn, need the Inbound Processor this
    // callback feeds into — wrapping the manager in a lock breaks the
    // cycle without changing the channels crate itself.
    let channel_manager: Arc<RwLock<ChannelManager>> = Arc::new(RwLock::new(ChannelManager::new()));
    let send_callback = make_send_callback(channel_manager.clone(), bot_id);

    let providers_map = config.providers.to_map();
    let provider = create_provider(&config.runtime.default_chat_model, &providers_map).map_err(|e| anyhow::anyhow!(e))?;

    let container_config = ContainerManagerConfig {
        default_image: config.containers.default_image.clone(),
        snapshotter: config.containers.snapshotter.clone(),
        stop_timeout: Duration::from_secs(config.containers.stop_timeout_seconds),
    };
    let container_manager = Arc::new(ContainerManager::new(
        Arc::new(FakeRuntime::new()),
        store.containers.clone(),
        store.snapshots.clone(),
        store.versions.clone(),
        container_config,
    ));
    container_manager.ensure_bot(&bot, host_data_path.to_string_lossy().to_string()).await?;
    if let Err(e) = container_manager.start(bot_id).await {
        warn!(error = %e, "container start failed, continuing without a live sandbox");
    }

    let memory_bridge = Arc::new(InMemoryMemoryBridge::new());
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ContainerReadTool::new(container_manager.clone())));
    tools.register(Arc::new(ContainerWriteTool::new(container_manager.clone())));
    tools.register(Arc::new(ContainerEditTool::new(container_manager.clone())));
    tools.register(Arc::new(ContainerListTool::new(container_manager.clone())));
    tools.register(Arc::new(ContainerExecTool::new(container_manager.clone(), "/workspace")));
    tools.register(Arc::new(MemoryTool::new(
        bot_id,
        Arc::new(BridgeMemorySearch { bot_id, bridge: memory_bridge.clone() }),
        vec![
            memoh_core::model::MemoryScope::Chat,
            memoh_core::model::MemoryScope::Private,
            memoh_core::model::MemoryScope::Public,
        ],
    )));
    tools.register(Arc::new(WebSearchTool::new(None)));
    tools.register(Arc::new(WebFetchTool::new()));
    tools.register(Arc::new(MessageTool::new(Some(send_callback.clone()), None, None)));

    let mcp_service = Arc::new(McpConnectionService::new(
        store.mcp_connections.clone(),
        Duration::from_secs(config.mcp.probe_timeout_seconds),
    ));
    mcp_service.start(bot_id).await.ok();
    federate_mcp_tools(&mcp_service, bot_id, &mut tools).await;

    let context = Arc::new(ContextBuilder::new(host_data_path.clone(), bot.name.clone()));

    let resolver = Arc::new(
        StepLoopResolver::new(Arc::new(provider), Arc::new(tools), context, memory_bridge, store.messages.clone())
            .with_max_steps(20),
    );

    let processor = Arc::new(InboundProcessor::new(
        store.bindings.clone(),
        store.bots.clone(),
        store.messages.clone(),
        resolver,
        Some(send_callback),
    ));
    spawn_stream_telemetry(processor.clone());

    Ok(BotRuntime { bot, store, processor, channel_manager, mcp_service })
}

/// Observes every turn's stream events independently of whatever channel
/// adapter is draining `InboundOutcome::Accepted` for that same turn — a
/// second subscriber fanned out through the Inbound Processor's event hub,
/// standing in for a telemetry/analytics sink.
fn spawn_stream_telemetry(processor: Arc<InboundProcessor>) {
    let hub = processor.event_hub();
    tokio::spawn(async move {
        let mut events = hub.subscribe().await;
        while let Some(event) = events.recv().await {
            debug!(?event, "stream event observed by telemetry sink");
        }
    });
}

/// Run the gateway — wires up and starts a single bot's full runtime,
/// binding every configured networked channel.
pub async fn run(config: Config) -> Result<()> {
    let BotRuntime { bot, store, processor, channel_manager, mcp_service } = build_runtime(&config).await?;
    let bot_id = bot.id;

    register_channels(&config, bot_id, processor.clone(), &channel_manager, &store).await?;

    let health_interval = Duration::from_secs(config.mcp.health_check_interval_seconds);
    let health_check_mcp = mcp_service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(health_interval);
        loop {
            ticker.tick().await;
            health_check_mcp.health_check_tick().await;
        }
    });

    info!(host = %config.gateway.host, port = config.gateway.port, "gateway starting");

    tokio::select! {
        result = async { channel_manager.read().await.start_all().await } => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            channel_manager.read().await.stop_all().await;
        }
    }

    Ok(())
}

/// Build the `send_callback` shared by `InboundProcessor` (policy-denied
/// fixed replies) and `MessageTool` (proactive sends from inside a turn).
fn make_send_callback(channel_manager: Arc<RwLock<ChannelManager>>, bot_id: Uuid) -> SendCallback {
    Arc::new(move |msg: OutboundSend| {
        let channel_manager = channel_manager.clone();
        Box::pin(async move {
            channel_manager
                .read()
                .await
                .route_send(bot_id, msg.channel_type, CHANNEL_IDENTITY, &msg.target_id, &msg.content)
                .await
        })
    })
}

/// Bind one adapter per configured, enabled networked channel. Every
/// binding needs both a registered `Channel` and a matching
/// `ChannelBinding` row — the Inbound Processor drops any turn whose
/// `(bot, channel type, identity)` has no binding on file.
async fn register_channels(
    config: &Config,
    bot_id: Uuid,
    processor: Arc<InboundProcessor>,
    channel_manager: &Arc<RwLock<ChannelManager>>,
    store: &InMemoryStore,
) -> Result<()> {
    #[cfg(feature = "telegram")]
    if !config.channels.telegram.token.is_empty() {
        use memoh_channels::telegram::TelegramChannel;
        let channel = Arc::new(TelegramChannel::new(
            bot_id,
            config.channels.telegram.token.clone(),
            processor.clone(),
            config.channels.telegram.allowed_users.clone(),
        ));
        bind_channel(channel_manager, store, bot_id, ChannelType::Telegram, channel as Arc<dyn Channel>).await?;
        info!("telegram channel bound");
    }

    #[cfg(feature = "discord")]
    if !config.channels.discord.token.is_empty() {
        use memoh_channels::discord::DiscordChannel;
        let channel = Arc::new(DiscordChannel::new(
            bot_id,
            config.channels.discord.token.clone(),
            processor.clone(),
            config.channels.discord.allowed_users.clone(),
        ));
        bind_channel(channel_manager, store, bot_id, ChannelType::Discord, channel as Arc<dyn Channel>).await?;
        info!("discord channel bound");
    }

    #[cfg(feature = "feishu")]
    if !config.channels.feishu.app_id.is_empty() {
        use memoh_channels::feishu::FeishuChannel;
        let channel = Arc::new(FeishuChannel::new(
            bot_id,
            config.channels.feishu.app_id.clone(),
            config.channels.feishu.app_secret.clone(),
            processor.clone(),
        ));
        bind_channel(channel_manager, store, bot_id, ChannelType::Feishu, channel as Arc<dyn Channel>).await?;
        info!("feishu channel bound");
    }

    #[cfg(not(any(feature = "telegram", feature = "discord", feature = "feishu")))]
    {
        let _ = (config, processor, channel_manager, store);
        warn!("no networked channel feature enabled; serve will idle with no bound adapters");
    }

    Ok(())
}


#[cfg_attr(not(any(feature = "telegram", feature = "discord", feature = "feishu")), allow(dead_code))]
async fn bind_channel(
    channel_manager: &Arc<RwLock<ChannelManager>>,
    store: &InMemoryStore,
    bot_id: Uuid,
    channel_type: ChannelType,
    channel: Arc<dyn Channel>,
) -> Result<()> {
    channel_manager.write().await.register(bot_id, CHANNEL_IDENTITY, channel);
    store
        .bindings
        .upsert(ChannelBinding {
            id: Uuid::new_v4(),
            bot_id,
            channel_type,
            channel_identity: CHANNEL_IDENTITY.to_string(),
            capabilities: BindingCapabilities { read: true, write: true, delete: false },
            credentials: std::collections::HashMap::new(),
            created_at: chrono::Utc::now(),
        })
        .await?;
    Ok(())
}
