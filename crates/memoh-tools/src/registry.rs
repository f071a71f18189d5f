//! Tool Registry and Tool Gateway.
//!
//! `ToolRegistry` is an in-process name→tool store with first-wins
//! registration. `ToolGateway` wraps a per-bot cache of registries with a
//! 5-second TTL, rebuilt on expiry or forced on a lookup miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use memoh_core::types::ToolDefinition;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::base::{Tool, ToolResult};

const CACHE_TTL: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────
// ToolRegistry
// ─────────────────────────────────────────────

/// Stores tools keyed by name and dispatches calls. Registration is
/// first-wins: a second `register()` call for a name that's already taken
/// is logged and dropped rather than silently overwriting the first tool.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Registers a tool. Returns `false` (and logs) if the name is already
    /// taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.tools.contains_key(tool.name()) {
            warn!(tool = tool.name(), "duplicate tool registration ignored, first registration wins");
            return false;
        }
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
        true
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(name);
        if removed.is_some() {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Executes a tool by name. A missing tool or a tool that returns `Err`
    /// both come back as an error-shaped `ToolResult`, never as a panic or
    /// propagated error.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return ToolResult::error(format!("Tool '{name}' not found"));
            }
        };

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolResult::error(format!("Error executing {name}: {e}"))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// ToolGateway
// ─────────────────────────────────────────────

struct CacheEntry {
    registry: Arc<ToolRegistry>,
    built_at: Instant,
}

/// Per-bot cache of tool registries. A registry is rebuilt via `builder`
/// when it's missing or older than the 5-second TTL; `call_tool` forces a
/// rebuild once if the name isn't found in the cached registry, in case a
/// tool was registered after the cache was last built.
pub struct ToolGateway<F>
where
    F: Fn(Uuid) -> ToolRegistry + Send + Sync,
{
    builder: F,
    cache: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl<F> ToolGateway<F>
where
    F: Fn(Uuid) -> ToolRegistry + Send + Sync,
{
    pub fn new(builder: F) -> Self {
        ToolGateway { builder, cache: RwLock::new(HashMap::new()) }
    }

    async fn current(&self, bot_id: Uuid) -> Arc<ToolRegistry> {
        if let Some(entry) = self.cache.read().await.get(&bot_id) {
            if entry.built_at.elapsed() < CACHE_TTL {
                return entry.registry.clone();
            }
        }
        self.rebuild(bot_id).await
    }

    async fn rebuild(&self, bot_id: Uuid) -> Arc<ToolRegistry> {
        let registry = Arc::new((self.builder)(bot_id));
        self.cache.write().await.insert(
            bot_id,
            CacheEntry { registry: registry.clone(), built_at: Instant::now() },
        );
        registry
    }

    pub async fn list_tools(&self, bot_id: Uuid) -> Vec<ToolDefinition> {
        self.current(bot_id).await.get_definitions()
    }

    pub async fn call_tool(&self, bot_id: Uuid, name: &str, params: HashMap<String, serde_json::Value>) -> ToolResult {
        let registry = self.current(bot_id).await;
        if registry.has(name) {
            return registry.execute(name, params).await;
        }
        // Forced refresh on miss: the tool may have been registered since
        // the cache was last built.
        let registry = self.rebuild(bot_id).await;
        registry.execute(name, params).await
    }
}
