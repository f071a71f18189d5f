//! MCP transports — `http` (JSON-RPC over a `reqwest::Client` POST) and
//! `stdio` (JSON-RPC lines over a spawned child process), behind a common
//! [`Transport`] trait.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use memoh_core::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::wire::{JsonRpcRequest, JsonRpcResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value>;
}

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::Relaxed)
}

// ─────────────────────────────────────────────
// HTTP transport
// ─────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, headers: HashMap<String, String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build MCP HTTP client");
        HttpTransport {
            client,
            endpoint: endpoint.into(),
            headers,
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let request = JsonRpcRequest::new(next_id(&self.next_id), method, params);
        debug!(endpoint = %self.endpoint, method, "mcp http call");

        let mut builder = self.client.post(&self.endpoint).json(&request);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("mcp endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::unavailable(format!(
                "mcp endpoint returned status {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("malformed mcp response: {e}")))?;

        body.into_result()
            .map_err(|e| Error::internal(format!("mcp error {}: {}", e.code, e.message)))
    }
}

// ─────────────────────────────────────────────
// Stdio transport
// ─────────────────────────────────────────────

/// Spawns `command` and speaks newline-delimited JSON-RPC over its
/// stdin/stdout.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    next_id: AtomicI64,
}

impl StdioTransport {
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::unavailable(format!("failed to spawn mcp stdio server: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| Error::internal("mcp child stdin missing"))?;
        let stdout = child.stdout.take().ok_or_else(|| Error::internal("mcp child stdout missing"))?;

        Ok(StdioTransport {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicI64::new(1),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        let id = next_id(&self.next_id);
        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| Error::internal(format!("failed to encode mcp request: {e}")))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::unavailable(format!("mcp stdio write failed: {e}")))?;
            stdin.flush().await.ok();
        }

        let mut buf = String::new();
        {
            let mut stdout = self.stdout.lock().await;
            stdout
                .read_line(&mut buf)
                .await
                .map_err(|e| Error::unavailable(format!("mcp stdio read failed: {e}")))?;
        }

        if buf.trim().is_empty() {
            let mut child = self.child.lock().await;
            if let Ok(Some(status)) = child.try_wait() {
                warn!(status = %status, "mcp stdio server exited unexpectedly");
            }
            return Err(Error::unavailable("mcp stdio server closed the connection"));
        }

        let response: JsonRpcResponse = serde_json::from_str(&buf)
            .map_err(|e| Error::internal(format!("malformed mcp stdio response: {e}")))?;
        response
            .into_result()
            .map_err(|e| Error::internal(format!("mcp error {}: {}", e.code, e.message)))
    }
}

pub type SharedTransport = Arc<dyn Transport>;
