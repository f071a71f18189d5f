//! Memory bridge — interface only. Reading and writing semantic memory is
//! an external collaborator (vector index, embedding model); this module
//! only defines the trait boundary the resolver and the `search_memory`
//! tool call through, plus a scored in-memory implementation for tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use memoh_core::error::Result;
use memoh_core::model::{MemoryItem, MemoryScope};
use memoh_tools::memory_tool::MemorySearch;
use uuid::Uuid;

/// Read/write boundary for a bot's semantic memory.
#[async_trait]
pub trait MemoryBridge: Send + Sync {
    /// Scored search restricted to `scopes`, deduplicated by id, ranked by
    /// score, capped at `top_k` by the caller.
    async fn query(&self, bot_id: Uuid, scopes: &[MemoryScope], text: &str, top_k: usize) -> Result<Vec<MemoryItem>>;

    async fn remember(&self, bot_id: Uuid, scope: MemoryScope, scope_key: &str, text: &str) -> Result<()>;
}

/// Wraps a [`MemoryBridge`] as the narrower [`MemorySearch`] seam the tool
/// gateway calls through.
pub struct ToolMemorySearch<B: MemoryBridge> {
    bridge: Arc<B>,
}

impl<B: MemoryBridge> ToolMemorySearch<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl<B: MemoryBridge> MemorySearch for ToolMemorySearch<B> {
    async fn search(&self, bot_id: Uuid, query: &str, scopes: &[MemoryScope], limit: usize) -> Result<Vec<MemoryItem>> {
        self.bridge.query(bot_id, scopes, query, limit).await
    }
}

// ─────────────────────────────────────────────
// InMemoryMemoryBridge
// ─────────────────────────────────────────────

/// Naive substring-scored store, keyed by (bot, scope, scope_key). Good
/// enough for tests and a `serve` default when no vector backend is wired.
#[derive(Default)]
pub struct InMemoryMemoryBridge {
    items: RwLock<HashMap<(Uuid, MemoryScope, String), Vec<MemoryItem>>>,
}

impl InMemoryMemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }
}

fn score(text: &str, query: &str) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let query_lower = query.to_lowercase();
    let hits = query_lower.split_whitespace().filter(|w| text_lower.contains(w)).count();
    let total = query_lower.split_whitespace().count().max(1);
    hits as f32 / total as f32
}

#[async_trait]
impl MemoryBridge for InMemoryMemoryBridge {
    async fn query(&self, bot_id: Uuid, scopes: &[MemoryScope], text: &str, top_k: usize) -> Result<Vec<MemoryItem>> {
        let items = self.items.read().unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut matches: Vec<MemoryItem> = items
            .iter()
            .filter(|((bid, scope, _), _)| *bid == bot_id && scopes.contains(scope))
            .flat_map(|(_, v)| v.iter().cloned())
            .filter(|item| seen.insert(item.id.clone()))
            .map(|mut item| {
                item.score = score(&item.text, text);
                item
            })
            .filter(|item| item.score > 0.0 || text.is_empty())
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn remember(&self, bot_id: Uuid, scope: MemoryScope, scope_key: &str, text: &str) -> Result<()> {
        let mut items = self.items.write().unwrap();
        let key = (bot_id, scope, scope_key.to_string());
        let entry = items.entry(key).or_default();
        entry.push(MemoryItem {
            id: Uuid::new_v4().to_string(),
            scope,
            scope_key: scope_key.to_string(),
            text: text.to_string(),
            score: 0.0,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_restricts_to_requested_scopes() {
        let bridge = InMemoryMemoryBridge::new();
        let bot_id = Uuid::new_v4();
        bridge.remember(bot_id, MemoryScope::Chat, "s1", "likes rust programming").await.unwrap();
        bridge.remember(bot_id, MemoryScope::Private, "s2", "secret rust key").await.unwrap();

        let results = bridge.query(bot_id, &[MemoryScope::Chat], "rust", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].scope, MemoryScope::Chat);
    }

    #[tokio::test]
    async fn query_dedupes_and_caps_top_k() {
        let bridge = InMemoryMemoryBridge::new();
        let bot_id = Uuid::new_v4();
        for i in 0..10 {
            bridge.remember(bot_id, MemoryScope::Public, "s", &format!("note about rust {i}")).await.unwrap();
        }
        let results = bridge.query(bot_id, &[MemoryScope::Public], "rust", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn other_bots_are_isolated() {
        let bridge = InMemoryMemoryBridge::new();
        let bot_a = Uuid::new_v4();
        let bot_b = Uuid::new_v4();
        bridge.remember(bot_a, MemoryScope::Chat, "s", "rust fact").await.unwrap();
        let results = bridge.query(bot_b, &[MemoryScope::Chat], "rust", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn tool_memory_search_delegates_to_bridge() {
        let bridge = Arc::new(InMemoryMemoryBridge::new());
        let bot_id = Uuid::new_v4();
        bridge.remember(bot_id, MemoryScope::Chat, "s", "rust fact").await.unwrap();
        let seam = ToolMemorySearch::new(bridge);
        let results = seam.search(bot_id, "rust", &[MemoryScope::Chat], 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
