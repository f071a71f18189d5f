//! Domain model for the Bot Execution Runtime.
//!
//! Plain serde structs/enums plus narrow persistence traits. The actual
//! relational store and vector index are external collaborators; this crate
//! only defines the shape of the data and ships an in-memory implementation
//! of each repository trait for `serve`'s default wiring and for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────
// Bot
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub name: String,
    pub memory_model: Option<String>,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Bot {
            id: Uuid::new_v4(),
            name: name.into(),
            memory_model: None,
            active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

// ─────────────────────────────────────────────
// Container record
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Deleting,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub bot_id: Uuid,
    pub container_id: String,
    pub image_ref: String,
    pub snapshotter: String,
    pub status: ContainerStatus,
    pub host_data_path: String,
    pub container_data_path: String,
    pub auto_start: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fixed prefix used to derive a container id from a bot id.
pub const CONTAINER_ID_PREFIX: &str = "memoh-bot-";

pub fn container_id_for_bot(bot_id: Uuid) -> String {
    format!("{CONTAINER_ID_PREFIX}{bot_id}")
}

// ─────────────────────────────────────────────
// Snapshot / Version
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    Manual,
    PreExec,
    Rollback,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub container_id: String,
    pub parent_snapshot: Option<String>,
    pub snapshotter: String,
    pub source: SnapshotSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub container_id: String,
    pub version: u32,
    pub snapshot_name: String,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────
// Channel binding
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Telegram,
    Discord,
    Feishu,
    LocalCli,
    LocalWeb,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Telegram => "telegram",
            ChannelType::Discord => "discord",
            ChannelType::Feishu => "feishu",
            ChannelType::LocalCli => "local-cli",
            ChannelType::LocalWeb => "local-web",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub channel_type: ChannelType,
    pub channel_identity: String,
    pub capabilities: Capabilities,
    pub credentials: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────
// Inbound message
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub path: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_type: ChannelType,
    pub source_id: String,
    pub target_id: String,
    pub sender_identity: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub reply_reference: Option<String>,
    pub transport_id: String,
    pub arrival_time: DateTime<Utc>,
}

impl InboundMessage {
    pub fn session_key(&self, bot_id: Uuid) -> String {
        format!("{}:{}:{}", bot_id, self.channel_type.as_str(), self.target_id)
    }

    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.channel_type.as_str(), self.transport_id)
    }
}

// ─────────────────────────────────────────────
// Stream session
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamSessionState {
    Opening,
    Started,
    Streaming,
    Finalizing,
    Closed,
    Errored,
}

impl StreamSessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamSessionState::Closed | StreamSessionState::Errored)
    }

    /// Whether `next` is a legal transition from `self`. Transitions are
    /// monotonic; `Closed`/`Errored` are terminal.
    pub fn can_transition_to(&self, next: StreamSessionState) -> bool {
        use StreamSessionState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Opening, Started)
                | (Opening, Errored)
                | (Started, Streaming)
                | (Started, Finalizing)
                | (Started, Errored)
                | (Streaming, Streaming)
                | (Streaming, Finalizing)
                | (Streaming, Errored)
                | (Finalizing, Closed)
                | (Finalizing, Errored)
                | (_, Closed)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub channel_type: ChannelType,
    pub target_id: String,
    pub reply_reference: Option<String>,
    pub state: StreamSessionState,
    pub created_at: DateTime<Utc>,
}

impl StreamSession {
    pub fn open(bot_id: Uuid, channel_type: ChannelType, target_id: impl Into<String>, reply_reference: Option<String>) -> Self {
        StreamSession {
            id: Uuid::new_v4(),
            bot_id,
            channel_type,
            target_id: target_id.into(),
            reply_reference,
            state: StreamSessionState::Opening,
            created_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────
// Tool descriptor
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ─────────────────────────────────────────────
// MCP connection
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpTransportKind {
    Http,
    Stdio,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McpConnection {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub name: String,
    pub transport: McpTransportKind,
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl McpConnection {
    /// Sanitized name prefix used to federate tool names: `<connection-name>.<tool>`.
    pub fn sanitized_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    pub fn federated_tool_name(&self, tool_name: &str) -> String {
        format!("{}.{}", self.sanitized_name(), tool_name)
    }
}

// ─────────────────────────────────────────────
// Memory item
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryScope {
    Chat,
    Private,
    Public,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub scope: MemoryScope,
    pub scope_key: String,
    pub text: String,
    pub score: f32,
}

// ─────────────────────────────────────────────
// Repository traits (external persistence boundary)
// ─────────────────────────────────────────────

#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Bot>;
    async fn upsert(&self, bot: Bot) -> Result<()>;
    async fn list_active(&self) -> Result<Vec<Bot>>;
}

#[async_trait]
pub trait ContainerRepository: Send + Sync {
    async fn get(&self, bot_id: Uuid) -> Result<ContainerRecord>;
    async fn upsert(&self, record: ContainerRecord) -> Result<()>;
    async fn delete(&self, bot_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert(&self, snapshot: Snapshot) -> Result<()>;
    async fn get(&self, container_id: &str, name: &str) -> Result<Snapshot>;
}

#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn insert(&self, version: Version) -> Result<()>;
    async fn list(&self, container_id: &str) -> Result<Vec<Version>>;
    async fn get(&self, container_id: &str, version: u32) -> Result<Version>;
    async fn next_version(&self, container_id: &str) -> Result<u32>;
}

#[async_trait]
pub trait ChannelBindingRepository: Send + Sync {
    async fn get(&self, bot_id: Uuid, channel_type: ChannelType, identity: &str) -> Result<ChannelBinding>;
    async fn upsert(&self, binding: ChannelBinding) -> Result<()>;
    async fn remove(&self, id: Uuid) -> Result<()>;
    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<ChannelBinding>>;
}

#[async_trait]
pub trait McpConnectionRepository: Send + Sync {
    async fn upsert(&self, conn: McpConnection) -> Result<()>;
    async fn remove(&self, id: Uuid) -> Result<()>;
    async fn list_active_by_bot(&self, bot_id: Uuid) -> Result<Vec<McpConnection>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub session_id: Uuid,
    pub bot_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, message: LoggedMessage) -> Result<()>;
    async fn recent(&self, bot_id: Uuid, limit: usize) -> Result<Vec<LoggedMessage>>;
}

// ─────────────────────────────────────────────
// In-memory implementations
// ─────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryBotRepository {
    bots: RwLock<HashMap<Uuid, Bot>>,
}

#[async_trait]
impl BotRepository for InMemoryBotRepository {
    async fn get(&self, id: Uuid) -> Result<Bot> {
        self.bots
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("bot {id}")))
    }

    async fn upsert(&self, bot: Bot) -> Result<()> {
        self.bots.write().await.insert(bot.id, bot);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Bot>> {
        Ok(self.bots.read().await.values().filter(|b| b.is_live()).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryContainerRepository {
    records: RwLock<HashMap<Uuid, ContainerRecord>>,
}

#[async_trait]
impl ContainerRepository for InMemoryContainerRepository {
    async fn get(&self, bot_id: Uuid) -> Result<ContainerRecord> {
        self.records
            .read()
            .await
            .get(&bot_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("container for bot {bot_id}")))
    }

    async fn upsert(&self, record: ContainerRecord) -> Result<()> {
        self.records.write().await.insert(record.bot_id, record);
        Ok(())
    }

    async fn delete(&self, bot_id: Uuid) -> Result<()> {
        self.records.write().await.remove(&bot_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySnapshotRepository {
    snapshots: RwLock<HashMap<(String, String), Snapshot>>,
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn insert(&self, snapshot: Snapshot) -> Result<()> {
        let key = (snapshot.container_id.clone(), snapshot.name.clone());
        self.snapshots.write().await.insert(key, snapshot);
        Ok(())
    }

    async fn get(&self, container_id: &str, name: &str) -> Result<Snapshot> {
        self.snapshots
            .read()
            .await
            .get(&(container_id.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("snapshot {name} for {container_id}")))
    }
}

#[derive(Default)]
pub struct InMemoryVersionRepository {
    versions: RwLock<HashMap<String, Vec<Version>>>,
}

#[async_trait]
impl VersionRepository for InMemoryVersionRepository {
    async fn insert(&self, version: Version) -> Result<()> {
        let mut guard = self.versions.write().await;
        let entries = guard.entry(version.container_id.clone()).or_default();
        if entries.iter().any(|v| v.version == version.version) {
            return Err(Error::already_exists(format!(
                "version {} for {}",
                version.version, version.container_id
            )));
        }
        entries.push(version);
        Ok(())
    }

    async fn list(&self, container_id: &str) -> Result<Vec<Version>> {
        Ok(self.versions.read().await.get(container_id).cloned().unwrap_or_default())
    }

    async fn get(&self, container_id: &str, version: u32) -> Result<Version> {
        self.versions
            .read()
            .await
            .get(container_id)
            .and_then(|vs| vs.iter().find(|v| v.version == version).cloned())
            .ok_or_else(|| Error::not_found(format!("version {version} for {container_id}")))
    }

    async fn next_version(&self, container_id: &str) -> Result<u32> {
        Ok(self
            .versions
            .read()
            .await
            .get(container_id)
            .and_then(|vs| vs.iter().map(|v| v.version).max())
            .map(|max| max + 1)
            .unwrap_or(1))
    }
}

#[derive(Default)]
pub struct InMemoryChannelBindingRepository {
    bindings: RwLock<HashMap<Uuid, ChannelBinding>>,
}

#[async_trait]
impl ChannelBindingRepository for InMemoryChannelBindingRepository {
    async fn get(&self, bot_id: Uuid, channel_type: ChannelType, identity: &str) -> Result<ChannelBinding> {
        self.bindings
            .read()
            .await
            .values()
            .find(|b| b.bot_id == bot_id && b.channel_type == channel_type && b.channel_identity == identity)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("binding {bot_id}/{}/{identity}", channel_type.as_str())))
    }

    async fn upsert(&self, binding: ChannelBinding) -> Result<()> {
        let mut guard = self.bindings.write().await;
        let duplicate = guard.values().any(|b| {
            b.id != binding.id
                && b.bot_id == binding.bot_id
                && b.channel_type == binding.channel_type
                && b.channel_identity == binding.channel_identity
        });
        if duplicate {
            return Err(Error::already_exists("binding already exists for (bot, type, identity)"));
        }
        guard.insert(binding.id, binding);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        self.bindings.write().await.remove(&id);
        Ok(())
    }

    async fn list_for_bot(&self, bot_id: Uuid) -> Result<Vec<ChannelBinding>> {
        Ok(self.bindings.read().await.values().filter(|b| b.bot_id == bot_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryMcpConnectionRepository {
    connections: RwLock<HashMap<Uuid, McpConnection>>,
}

#[async_trait]
impl McpConnectionRepository for InMemoryMcpConnectionRepository {
    async fn upsert(&self, conn: McpConnection) -> Result<()> {
        let mut guard = self.connections.write().await;
        let duplicate = guard
            .values()
            .any(|c| c.id != conn.id && c.bot_id == conn.bot_id && c.name == conn.name);
        if duplicate {
            return Err(Error::already_exists(format!("mcp connection name {} for bot", conn.name)));
        }
        guard.insert(conn.id, conn);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        self.connections.write().await.remove(&id);
        Ok(())
    }

    async fn list_active_by_bot(&self, bot_id: Uuid) -> Result<Vec<McpConnection>> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.bot_id == bot_id && c.active)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMessageLog {
    messages: RwLock<Vec<LoggedMessage>>,
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, message: LoggedMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn recent(&self, bot_id: Uuid, limit: usize) -> Result<Vec<LoggedMessage>> {
        let guard = self.messages.read().await;
        Ok(guard
            .iter()
            .rev()
            .filter(|m| m.bot_id == bot_id)
            .take(limit)
            .rev()
            .cloned()
            .collect())
    }
}

/// Bundle of in-memory repositories, convenient for `serve`'s default wiring
/// and for integration tests.
#[derive(Clone)]
pub struct InMemoryStore {
    pub bots: Arc<InMemoryBotRepository>,
    pub containers: Arc<InMemoryContainerRepository>,
    pub snapshots: Arc<InMemorySnapshotRepository>,
    pub versions: Arc<InMemoryVersionRepository>,
    pub bindings: Arc<InMemoryChannelBindingRepository>,
    pub mcp_connections: Arc<InMemoryMcpConnectionRepository>,
    pub messages: Arc<InMemoryMessageLog>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore {
            bots: Arc::new(InMemoryBotRepository::default()),
            containers: Arc::new(InMemoryContainerRepository::default()),
            snapshots: Arc::new(InMemorySnapshotRepository::default()),
            versions: Arc::new(InMemoryVersionRepository::default()),
            bindings: Arc::new(InMemoryChannelBindingRepository::default()),
            mcp_connections: Arc::new(InMemoryMcpConnectionRepository::default()),
            messages: Arc::new(InMemoryMessageLog::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bot_round_trip() {
        let repo = InMemoryBotRepository::default();
        let bot = Bot::new("assistant");
        let id = bot.id;
        repo.upsert(bot).await.unwrap();
        let fetched = repo.get(id).await.unwrap();
        assert_eq!(fetched.name, "assistant");
        assert!(fetched.is_live());
    }

    #[tokio::test]
    async fn version_repository_is_gap_free() {
        let repo = InMemoryVersionRepository::default();
        let cid = "memoh-bot-x";
        for _ in 0..3 {
            let next = repo.next_version(cid).await.unwrap();
            repo.insert(Version {
                container_id: cid.to_string(),
                version: next,
                snapshot_name: format!("snap-{next}"),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let versions: Vec<u32> = repo.list(cid).await.unwrap().iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn duplicate_version_rejected() {
        let repo = InMemoryVersionRepository::default();
        let v = Version {
            container_id: "c1".into(),
            version: 1,
            snapshot_name: "s1".into(),
            created_at: Utc::now(),
        };
        repo.insert(v.clone()).await.unwrap();
        let err = repo.insert(v).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn federated_tool_name_uses_sanitized_connection_name() {
        let conn = McpConnection {
            id: Uuid::new_v4(),
            bot_id: Uuid::new_v4(),
            name: "weather api!".into(),
            transport: McpTransportKind::Http,
            endpoint: "https://example.com".into(),
            headers: HashMap::new(),
            active: true,
            created_at: Utc::now(),
        };
        assert_eq!(conn.federated_tool_name("forecast"), "weather_api_.forecast");
    }

    #[test]
    fn stream_session_transitions_are_monotonic() {
        use StreamSessionState::*;
        assert!(Opening.can_transition_to(Started));
        assert!(Streaming.can_transition_to(Finalizing));
        assert!(Finalizing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Started));
        assert!(!Errored.can_transition_to(Streaming));
    }

    #[tokio::test]
    async fn channel_binding_unique_per_bot_type_identity() {
        let repo = InMemoryChannelBindingRepository::default();
        let bot_id = Uuid::new_v4();
        let b1 = ChannelBinding {
            id: Uuid::new_v4(),
            bot_id,
            channel_type: ChannelType::Telegram,
            channel_identity: "123".into(),
            capabilities: Capabilities { read: true, write: true, delete: false },
            credentials: HashMap::new(),
            created_at: Utc::now(),
        };
        repo.upsert(b1.clone()).await.unwrap();
        let mut b2 = b1.clone();
        b2.id = Uuid::new_v4();
        let err = repo.upsert(b2).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyExists);
    }
}
