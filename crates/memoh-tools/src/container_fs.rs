//! Container-filesystem tools — `read`, `write`, `list`, `edit`, `exec`,
//! each delegating to a bot's container via
//! [`memoh_containers::ContainerManager::exec_with_capture`].
//!
//! There is no local filesystem access here: every operation is itself a
//! command run inside the container, following the same captured/timed-out
//! shape as the teacher's `shell.rs`, adapted from a local subprocess to a
//! remote exec call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use memoh_containers::{ContainerManager, Runtime};
use serde_json::{json, Value};
use uuid::Uuid;

use super::base::{optional_i64, optional_string, require_string, Tool, ToolResult};

const MAX_LINES: usize = 200;
const MAX_BYTES: usize = 5 * 1024;
const MAX_RUNES_PER_LINE: usize = 1000;
const BINARY_PROBE_BYTES: usize = 8 * 1024;
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Wraps a string in single quotes for safe interpolation into an
/// `sh -c` command line, escaping any embedded single quotes.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() > MAX_RUNES_PER_LINE {
        let truncated: String = line.chars().take(MAX_RUNES_PER_LINE).collect();
        format!("{truncated}…")
    } else {
        line.to_string()
    }
}

// ─────────────────────────────────────────────
// ContainerReadTool
// ─────────────────────────────────────────────

pub struct ContainerReadTool<R: Runtime> {
    manager: Arc<ContainerManager<R>>,
}

impl<R: Runtime> ContainerReadTool<R> {
    pub fn new(manager: Arc<ContainerManager<R>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Tool for ContainerReadTool<R> {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a paginated window of a file inside the bot's container."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bot_id": {"type": "string", "description": "Bot id"},
                "path": {"type": "string", "description": "Path inside the container"},
                "line_offset": {"type": "integer", "description": "1-based starting line (default 1)"},
                "n_lines": {"type": "integer", "description": "Lines to read, 1-200 (default 200)"}
            },
            "required": ["bot_id", "path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let bot_id: Uuid = require_string(&params, "bot_id")?.parse()?;
        let path = require_string(&params, "path")?;
        let line_offset = optional_i64(&params, "line_offset").unwrap_or(1).max(1) as usize;
        let n_lines = optional_i64(&params, "n_lines").unwrap_or(MAX_LINES as i64).clamp(1, MAX_LINES as i64) as usize;

        let probe = self
            .manager
            .exec_with_capture(bot_id, vec!["head".into(), "-c".into(), BINARY_PROBE_BYTES.to_string(), path.clone()], 10)
            .await?;
        if probe.stdout.contains(&0u8) {
            return Ok(ToolResult::error(format!("{path}: Read tool only supports text files")));
        }

        let end = line_offset + n_lines - 1;
        let cmd = format!("sed -n '{line_offset},{end}p' {}", shell_quote(&path));
        let output = self
            .manager
            .exec_with_capture(bot_id, vec!["sh".into(), "-c".into(), cmd], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;

        if output.exit_code != 0 {
            return Ok(ToolResult::error(format!(
                "{path}: read failed (exit {}): {}",
                output.exit_code,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines: Vec<&str> = text.lines().collect();
        let mut truncated_bytes = false;
        let mut acc_bytes = 0usize;
        let mut rendered = Vec::with_capacity(lines.len());
        for (i, line) in lines.drain(..).enumerate() {
            let shown = truncate_line(line);
            acc_bytes += shown.len();
            if acc_bytes > MAX_BYTES {
                truncated_bytes = true;
                break;
            }
            rendered.push(format!("{:>6}\t{shown}", line_offset + i));
        }

        let read_count = rendered.len();
        let mut body = rendered.join("\n");
        if truncated_bytes || read_count == n_lines {
            body.push_str(&format!(
                "\n... Continue with line_offset={}",
                line_offset + read_count
            ));
        } else {
            body.push_str("\n... End of file");
        }

        Ok(ToolResult::ok(body))
    }
}

// ─────────────────────────────────────────────
// ContainerWriteTool
// ─────────────────────────────────────────────

pub struct ContainerWriteTool<R: Runtime> {
    manager: Arc<ContainerManager<R>>,
}

impl<R: Runtime> ContainerWriteTool<R> {
    pub fn new(manager: Arc<ContainerManager<R>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Tool for ContainerWriteTool<R> {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the bot's container, creating parent directories as needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bot_id": {"type": "string"},
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["bot_id", "path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let bot_id: Uuid = require_string(&params, "bot_id")?.parse()?;
        let path = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;

        let cmd = format!(
            "mkdir -p $(dirname {path}) && printf '%s' {content} > {path}",
            path = shell_quote(&path),
            content = shell_quote(&content),
        );
        let output = self
            .manager
            .exec_with_capture(bot_id, vec!["sh".into(), "-c".into(), cmd], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;

        if output.exit_code != 0 {
            return Ok(ToolResult::error(format!(
                "{path}: write failed (exit {}): {}",
                output.exit_code,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(ToolResult::ok(format!("Wrote {} bytes to {path}", content.len())))
    }
}

// ─────────────────────────────────────────────
// ContainerEditTool
// ─────────────────────────────────────────────

pub struct ContainerEditTool<R: Runtime> {
    manager: Arc<ContainerManager<R>>,
}

impl<R: Runtime> ContainerEditTool<R> {
    pub fn new(manager: Arc<ContainerManager<R>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Tool for ContainerEditTool<R> {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of old_text with new_text in a container file."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bot_id": {"type": "string"},
                "path": {"type": "string"},
                "old_text": {"type": "string"},
                "new_text": {"type": "string"}
            },
            "required": ["bot_id", "path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let bot_id: Uuid = require_string(&params, "bot_id")?.parse()?;
        let path = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;

        let cat_cmd = format!("cat {}", shell_quote(&path));
        let read = self
            .manager
            .exec_with_capture(bot_id, vec!["sh".into(), "-c".into(), cat_cmd], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;
        if read.exit_code != 0 {
            return Ok(ToolResult::error(format!("{path}: not found")));
        }

        let content = String::from_utf8_lossy(&read.stdout).to_string();
        let count = content.matches(&old_text).count();
        if count == 0 {
            return Ok(ToolResult::error(format!("old_text not found in {path}")));
        }
        let updated = content.replacen(&old_text, &new_text, 1);

        let write_cmd = format!("printf '%s' {} > {}", shell_quote(&updated), shell_quote(&path));
        let write = self
            .manager
            .exec_with_capture(bot_id, vec!["sh".into(), "-c".into(), write_cmd], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;
        if write.exit_code != 0 {
            return Ok(ToolResult::error(format!("{path}: write-back failed")));
        }

        let warning = if count > 1 {
            format!("Warning: old_text appears {count} times; only the first occurrence was replaced. ")
        } else {
            String::new()
        };
        Ok(ToolResult::ok(format!("{warning}Successfully edited {path}")))
    }
}

// ─────────────────────────────────────────────
// ContainerListTool
// ─────────────────────────────────────────────

pub struct ContainerListTool<R: Runtime> {
    manager: Arc<ContainerManager<R>>,
}

impl<R: Runtime> ContainerListTool<R> {
    pub fn new(manager: Arc<ContainerManager<R>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Tool for ContainerListTool<R> {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory inside the bot's container."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"bot_id": {"type": "string"}, "path": {"type": "string"}},
            "required": ["bot_id", "path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let bot_id: Uuid = require_string(&params, "bot_id")?.parse()?;
        let path = require_string(&params, "path")?;

        let cmd = format!("ls -1A {}", shell_quote(&path));
        let output = self
            .manager
            .exec_with_capture(bot_id, vec!["sh".into(), "-c".into(), cmd], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;

        if output.exit_code != 0 {
            return Ok(ToolResult::error(format!(
                "{path}: not a directory or not found"
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        if text.trim().is_empty() {
            Ok(ToolResult::ok("(empty directory)"))
        } else {
            Ok(ToolResult::ok(text.trim_end().to_string()))
        }
    }
}

// ─────────────────────────────────────────────
// ContainerExecTool
// ─────────────────────────────────────────────

pub struct ContainerExecTool<R: Runtime> {
    manager: Arc<ContainerManager<R>>,
    default_workdir: String,
}

impl<R: Runtime> ContainerExecTool<R> {
    pub fn new(manager: Arc<ContainerManager<R>>, default_workdir: impl Into<String>) -> Self {
        Self { manager, default_workdir: default_workdir.into() }
    }
}

#[async_trait]
impl<R: Runtime + 'static> Tool for ContainerExecTool<R> {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command inside the bot's container and return captured output."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bot_id": {"type": "string"},
                "command": {"type": "string"},
                "working_dir": {"type": "string"}
            },
            "required": ["bot_id", "command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let bot_id: Uuid = require_string(&params, "bot_id")?.parse()?;
        let command = require_string(&params, "command")?;
        let workdir = optional_string(&params, "working_dir").unwrap_or_else(|| self.default_workdir.clone());

        let wrapped = format!("cd {} && {command}", shell_quote(&workdir));
        let output = self
            .manager
            .exec_with_capture(bot_id, vec!["/bin/sh".into(), "-c".into(), wrapped], DEFAULT_EXEC_TIMEOUT_SECS)
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout.to_string());
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        if output.exit_code != 0 {
            parts.push(format!("Exit code: {}", output.exit_code));
        }
        let body = if parts.is_empty() { "(no output)".to_string() } else { parts.join("\n") };

        Ok(ToolResult::ok_structured(body, json!({"exitCode": output.exit_code})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoh_containers::{ContainerManagerConfig, FakeRuntime};
    use memoh_core::model::{Bot, InMemoryContainerRepository, InMemorySnapshotRepository, InMemoryVersionRepository};

    fn make_manager() -> Arc<ContainerManager<FakeRuntime>> {
        Arc::new(ContainerManager::new(
            Arc::new(FakeRuntime::new()),
            Arc::new(InMemoryContainerRepository::default()),
            Arc::new(InMemorySnapshotRepository::default()),
            Arc::new(InMemoryVersionRepository::default()),
            ContainerManagerConfig::default(),
        ))
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[tokio::test]
    async fn exec_tool_wraps_with_workdir() {
        let manager = make_manager();
        let bot = Bot::new("b");
        manager.ensure_bot(&bot, "/host").await.unwrap();
        manager.start(bot.id).await.unwrap();

        let tool = ContainerExecTool::new(manager, "/data");
        let mut params = HashMap::new();
        params.insert("bot_id".into(), json!(bot.id.to_string()));
        params.insert("command".into(), json!("echo hi"));
        let result = tool.execute(params).await.unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("ran:"));
    }

    #[tokio::test]
    async fn read_tool_rejects_missing_bot_id() {
        let manager = make_manager();
        let tool = ContainerReadTool::new(manager);
        let mut params = HashMap::new();
        params.insert("path".into(), json!("/data/foo.txt"));
        assert!(tool.execute(params).await.is_err());
    }

    /// Exec stub whose probe response always contains a NUL byte, as if
    /// `head -c` had read into a binary file.
    struct BinaryProbeRuntime;

    #[async_trait]
    impl Runtime for BinaryProbeRuntime {
        async fn create_task(
            &self,
            container_id: &str,
            _image_ref: &str,
            _snapshot: &str,
        ) -> memoh_core::Result<memoh_containers::TaskHandle> {
            Ok(memoh_containers::TaskHandle { container_id: container_id.to_string(), pid: 1 })
        }
        async fn start_task(&self, _container_id: &str) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn signal_task(&self, _container_id: &str, _sigkill: bool) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn attach_network(&self, _container_id: &str) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn detach_network(&self, _container_id: &str) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn prepare_snapshot(&self, _name: &str, _parent: Option<&str>) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn commit_snapshot(&self, _name: &str) -> memoh_core::Result<()> {
            Ok(())
        }
        async fn exec(&self, _container_id: &str, _command: &[String], _timeout_secs: u64) -> memoh_core::Result<memoh_containers::ExecOutput> {
            Ok(memoh_containers::ExecOutput { stdout: vec![0x7f, 0x45, 0x4c, 0x46, 0x00, 0x01], stderr: Vec::new(), exit_code: 0 })
        }
        async fn delete_task(&self, _container_id: &str) -> memoh_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn read_tool_rejects_binary_files() {
        let manager = Arc::new(ContainerManager::new(
            Arc::new(BinaryProbeRuntime),
            Arc::new(InMemoryContainerRepository::default()),
            Arc::new(InMemorySnapshotRepository::default()),
            Arc::new(InMemoryVersionRepository::default()),
            ContainerManagerConfig::default(),
        ));
        let bot = Bot::new("b");
        manager.ensure_bot(&bot, "/host").await.unwrap();
        manager.start(bot.id).await.unwrap();

        let tool = ContainerReadTool::new(manager);
        let mut params = HashMap::new();
        params.insert("bot_id".into(), json!(bot.id.to_string()));
        params.insert("path".into(), json!("/data/app.bin"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("Read tool only supports text files"));
    }

    #[test]
    fn truncate_line_caps_at_max_runes() {
        let long = "a".repeat(MAX_RUNES_PER_LINE + 10);
        let shown = truncate_line(&long);
        assert_eq!(shown.chars().count(), MAX_RUNES_PER_LINE + 1);
    }
}
