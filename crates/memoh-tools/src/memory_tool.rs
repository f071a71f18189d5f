//! Memory tool — `search_memory`, a thin wrapper over whatever backs
//! semantic memory for a bot. The gateway only needs to call `search`;
//! `memoh-flow`'s memory bridge is the concrete implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use memoh_core::error::Result as CoreResult;
use memoh_core::model::{MemoryItem, MemoryScope};
use serde_json::{json, Value};
use uuid::Uuid;

use super::base::{optional_i64, require_string, Tool, ToolResult};

const MAX_RESULTS: usize = 50;

/// Seam between the tool gateway and a memory backend. Scopes enabled per
/// bot are the caller's concern; `search` is handed exactly the scopes to
/// query.
#[async_trait]
pub trait MemorySearch: Send + Sync {
    async fn search(&self, bot_id: Uuid, query: &str, scopes: &[MemoryScope], limit: usize) -> CoreResult<Vec<MemoryItem>>;
}

fn parse_scope(s: &str) -> Option<MemoryScope> {
    match s {
        "chat" => Some(MemoryScope::Chat),
        "private" => Some(MemoryScope::Private),
        "public" => Some(MemoryScope::Public),
        _ => None,
    }
}

pub struct MemoryTool {
    bot_id: Uuid,
    backend: Arc<dyn MemorySearch>,
    enabled_scopes: Vec<MemoryScope>,
}

impl MemoryTool {
    pub fn new(bot_id: Uuid, backend: Arc<dyn MemorySearch>, enabled_scopes: Vec<MemoryScope>) -> Self {
        Self { bot_id, backend, enabled_scopes }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search the bot's semantic memory across the scopes enabled for this bot."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search text"},
                "scopes": {
                    "type": "array",
                    "items": {"type": "string", "enum": ["chat", "private", "public"]},
                    "description": "Restrict to these scopes (default: all enabled for this bot)"
                },
                "limit": {"type": "integer", "description": "Max results, capped at 50 (default 10)"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let query = require_string(&params, "query")?;
        let limit = optional_i64(&params, "limit").unwrap_or(10).clamp(1, MAX_RESULTS as i64) as usize;

        let requested_scopes: Vec<MemoryScope> = params
            .get("scopes")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().and_then(parse_scope)).collect())
            .unwrap_or_default();

        let scopes: Vec<MemoryScope> = if requested_scopes.is_empty() {
            self.enabled_scopes.clone()
        } else {
            requested_scopes.into_iter().filter(|s| self.enabled_scopes.contains(s)).collect()
        };

        if scopes.is_empty() {
            return Ok(ToolResult::ok("No memory scopes enabled for this bot."));
        }

        let mut items = self.backend.search(self.bot_id, &query, &scopes, limit).await?;

        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.id.clone()));
        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        items.truncate(limit.min(MAX_RESULTS));

        if items.is_empty() {
            return Ok(ToolResult::ok("No matching memories found."));
        }

        let text = items
            .iter()
            .map(|item| format!("[{:?}] (score {:.3}) {}", item.scope, item.score, item.text))
            .collect::<Vec<_>>()
            .join("\n");

        let structured = json!({
            "items": items.iter().map(|i| json!({
                "id": i.id,
                "scope": format!("{:?}", i.scope).to_lowercase(),
                "scopeKey": i.scope_key,
                "text": i.text,
                "score": i.score,
            })).collect::<Vec<_>>()
        });

        Ok(ToolResult::ok_structured(text, structured))
    }
}
