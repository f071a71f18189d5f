//! Config loading, saving, migration, and environment-variable overrides.

use super::schema::Config;
use std::path::PathBuf;
use tracing::warn;

/// Path to the config file: `~/.memoh/config.json`.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load config from the default path, applying env overrides.
/// Falls back to defaults if the file is missing, unreadable, or unparseable.
pub fn load_config() -> Config {
    load_config_from_path(&get_config_path())
}

/// Load config from an explicit path.
pub fn load_config_from_path(path: &std::path::Path) -> Config {
    let mut config = if path.exists() {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "failed to parse config, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read config, using defaults");
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    migrate_config(&mut config);
    apply_env_overrides(&mut config);
    config
}

/// Persist config as pretty-printed JSON.
pub fn save_config(config: &Config, path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

/// Placeholder for forward schema migrations. Currently a no-op: the schema
/// has not yet needed a breaking rename since its introduction.
fn migrate_config(_config: &mut Config) {}

/// Apply `MEMOH_<SECTION>__<FIELD>` environment variable overrides.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("MEMOH_RUNTIME__DEFAULT_CHAT_MODEL") {
        config.runtime.default_chat_model = v;
    }
    if let Ok(v) = std::env::var("MEMOH_RUNTIME__MAX_TOKENS") {
        if let Ok(n) = v.parse() {
            config.runtime.max_tokens = n;
        }
    }
    if let Ok(v) = std::env::var("MEMOH_RUNTIME__TEMPERATURE") {
        if let Ok(n) = v.parse() {
            config.runtime.temperature = n;
        }
    }
    if let Ok(v) = std::env::var("MEMOH_RUNTIME__DATA_ROOT") {
        config.runtime.data_root = v;
    }
    if let Ok(v) = std::env::var("MEMOH_RUNTIME__AUTH_SECRET") {
        config.runtime.auth_secret = v;
    }

    apply_provider_env(&mut config.providers.anthropic, "ANTHROPIC");
    apply_provider_env(&mut config.providers.openai, "OPENAI");
    apply_provider_env(&mut config.providers.openrouter, "OPENROUTER");
    apply_provider_env(&mut config.providers.vllm, "VLLM");

    if let Ok(v) = std::env::var("MEMOH_GATEWAY__HOST") {
        config.gateway.host = v;
    }
    if let Ok(v) = std::env::var("MEMOH_GATEWAY__PORT") {
        if let Ok(n) = v.parse() {
            config.gateway.port = n;
        }
    }

    if let Ok(v) = std::env::var("MEMOH_CONTAINERS__CONTAINERD_SOCKET") {
        config.containers.containerd_socket = v;
    }
    if let Ok(v) = std::env::var("MEMOH_CONTAINERS__DEFAULT_IMAGE") {
        config.containers.default_image = v;
    }

    if let Ok(v) = std::env::var("MEMOH_MCP__PROBE_TIMEOUT_SECONDS") {
        if let Ok(n) = v.parse() {
            config.mcp.probe_timeout_seconds = n;
        }
    }
}

fn apply_provider_env(provider: &mut super::schema::ProviderConfig, name: &str) {
    if let Ok(v) = std::env::var(format!("MEMOH_PROVIDERS__{name}__API_KEY")) {
        provider.api_key = v;
    }
    if let Ok(v) = std::env::var(format!("MEMOH_PROVIDERS__{name}__API_BASE")) {
        provider.api_base = Some(v);
    }
}
