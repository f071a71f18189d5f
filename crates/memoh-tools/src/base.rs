//! Tool trait and the structured result it returns.

use async_trait::async_trait;
use memoh_core::types::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;

// ─────────────────────────────────────────────
// ToolResult
// ─────────────────────────────────────────────

/// Uniform success/error shape returned by every tool executor: an
/// `isError` flag, a text summary for the LLM, and optional structured
/// content for callers that want more than text.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub is_error: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        ToolResult { is_error: false, content: content.into(), structured_content: None }
    }

    pub fn ok_structured(content: impl Into<String>, structured: Value) -> Self {
        ToolResult { is_error: false, content: content.into(), structured_content: Some(structured) }
    }

    pub fn error(content: impl Into<String>) -> Self {
        ToolResult { is_error: true, content: content.into(), structured_content: None }
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every tool executor implements this trait. The gateway discovers tools
/// via `name()`, sends their schemas to the LLM via `to_definition()`, and
/// dispatches calls via `execute()`. Tools never panic into the gateway:
/// a fallible `execute` returns `Err`, which the registry converts into an
/// error-shaped [`ToolResult`] rather than propagating.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn optional_bool(params: &HashMap<String, Value>, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string_present() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!("/tmp/foo.txt"));
        assert_eq!(require_string(&params, "path").unwrap(), "/tmp/foo.txt");
    }

    #[test]
    fn test_require_string_missing() {
        let params = HashMap::new();
        assert!(require_string(&params, "path").is_err());
    }

    #[test]
    fn test_optional_string() {
        let mut params = HashMap::new();
        params.insert("mode".into(), json!("markdown"));
        assert_eq!(optional_string(&params, "mode"), Some("markdown".into()));
        assert_eq!(optional_string(&params, "other"), None);
    }

    #[test]
    fn test_optional_bool() {
        let mut params = HashMap::new();
        params.insert("force".into(), json!(true));
        assert!(optional_bool(&params, "force"));
        assert!(!optional_bool(&params, "missing"));
    }

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::ok("done");
        assert!(!ok.is_error);
        assert!(ok.structured_content.is_none());

        let err = ToolResult::error("nope");
        assert!(err.is_error);

        let structured = ToolResult::ok_structured("done", json!({"n": 1}));
        assert_eq!(structured.structured_content.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_to_definition_default() {
        struct DummyTool;

        #[async_trait]
        impl Tool for DummyTool {
            fn name(&self) -> &str { "dummy" }
            fn description(&self) -> &str { "A test tool" }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {"msg": {"type": "string"}}, "required": ["msg"]})
            }
            async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
                Ok(ToolResult::ok("ok"))
            }
        }

        let def = DummyTool.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
    }
}
