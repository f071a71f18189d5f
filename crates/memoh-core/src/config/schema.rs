//! Configuration schema.
//!
//! Hierarchy: `Config` → `RuntimeConfig`, `ProvidersConfig`, `ChannelsConfig`,
//! `ContainersConfig`, `McpConfig`, `GatewayConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case, handled via
//! `#[serde(rename_all = "camelCase")]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.memoh/config.json` + env vars.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub providers: ProvidersConfig,
    pub channels: ChannelsConfig,
    pub containers: ContainersConfig,
    pub mcp: McpConfig,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
            containers: ContainersConfig::default(),
            mcp: McpConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────
// Runtime (was "agents" — Flow Resolver defaults)
// ─────────────────────────────────────────────

/// Flow Resolver runtime defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Root directory holding per-bot data (`<dataRoot>/bots/<bot-id>/`).
    pub data_root: String,
    /// Default chat model identifier used when a bot has no override.
    pub default_chat_model: String,
    /// Default embedding model identifier (used by the external memory
    /// extraction collaborator, not by this runtime directly).
    pub default_embedding_model: String,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum tokens to generate per step.
    pub max_tokens: u32,
    /// Minutes of chat history considered "active context" when assembling
    /// the system prompt (spec §4.3).
    pub active_context_minutes: u32,
    /// Top-K memory items retained after dedup across the three scopes.
    pub memory_top_k: u32,
    /// Shared secret used to validate pre-auth tokens on inbound channel
    /// traffic (auth/JWT verification itself is an external collaborator).
    pub auth_secret: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_root: "~/.memoh/data".to_string(),
            default_chat_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            default_embedding_model: "openai/text-embedding-3-small".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            active_context_minutes: 120,
            memory_top_k: 8,
            auth_secret: String::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Provider configurations actually exercised by this runtime: one
/// OpenAI-compatible generic client plus Anthropic, OpenRouter, and a
/// local/vLLM endpoint. See DESIGN.md for why the teacher's full
/// twelve-provider matrix was trimmed down to these four.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "openrouter" => Some(&self.openrouter),
            "vllm" => Some(&self.vllm),
            _ => None,
        }
    }

    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let mut map = HashMap::new();
        map.insert("anthropic".to_string(), self.anthropic.clone());
        map.insert("openai".to_string(), self.openai.clone());
        map.insert("openrouter".to_string(), self.openrouter.clone());
        map.insert("vllm".to_string(), self.vllm.clone());
        map
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
    #[serde(default)]
    pub local: LocalChannelConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeishuConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// Local-CLI / Local-Web adapter config — no external credentials, just a
/// toggle for whether the observer-facing WebSocket re-encoding is enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalChannelConfig {
    #[serde(default = "default_true")]
    pub web_enabled: bool,
}

impl Default for LocalChannelConfig {
    fn default() -> Self {
        Self { web_enabled: true }
    }
}

fn default_true() -> bool {
    true
}

// ─────────────────────────────────────────────
// Containers
// ─────────────────────────────────────────────

/// Container Manager configuration (spec §4.5/§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainersConfig {
    /// Path to the containerd control socket.
    pub containerd_socket: String,
    /// CNI plugin binary directory.
    pub cni_bin_dir: String,
    /// CNI network configuration directory.
    pub cni_conf_dir: String,
    /// Default OCI image reference used when creating a bot's container.
    pub default_image: String,
    /// Snapshotter name (overlay/snapshot backend).
    pub snapshotter: String,
    /// SIGTERM-to-SIGKILL grace period in seconds for `Stop`.
    pub stop_timeout_seconds: u64,
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            containerd_socket: "/run/containerd/containerd.sock".to_string(),
            cni_bin_dir: "/opt/cni/bin".to_string(),
            cni_conf_dir: "/etc/cni/net.d".to_string(),
            default_image: "docker.io/memoh/bot-runtime:latest".to_string(),
            snapshotter: "overlayfs".to_string(),
            stop_timeout_seconds: 10,
        }
    }
}

// ─────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────

/// MCP Connection Service configuration (spec §4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpConfig {
    /// Health check probe timeout in seconds.
    pub probe_timeout_seconds: u64,
    /// Interval in seconds between periodic health checks.
    pub health_check_interval_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 8,
            health_check_interval_seconds: 60,
        }
    }
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// Observer-facing gateway (Local-Web's WebSocket re-encoding + telemetry
/// sink subscribe endpoint).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18790,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
