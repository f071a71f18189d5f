//! MCP Connection Service — CRUD over persisted connections, startup
//! transport-open + health-check, periodic health probing with cached
//! per-connection status, and federated tool listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use memoh_core::error::Result;
use memoh_core::model::{McpConnection, McpConnectionRepository, McpTransportKind};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::transport::{HttpTransport, SharedTransport, StdioTransport, Transport};
use crate::wire::{ListToolsResult, McpToolDescriptor};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    Warn(String),
    Error(String),
}

pub struct McpConnectionService {
    repo: Arc<dyn McpConnectionRepository>,
    probe_timeout: Duration,
    transports: RwLock<HashMap<Uuid, SharedTransport>>,
    statuses: RwLock<HashMap<Uuid, ProbeStatus>>,
}

impl McpConnectionService {
    pub fn new(repo: Arc<dyn McpConnectionRepository>, probe_timeout: Duration) -> Self {
        McpConnectionService {
            repo,
            probe_timeout,
            transports: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    fn open_transport(conn: &McpConnection) -> Result<SharedTransport> {
        match conn.transport {
            McpTransportKind::Http => Ok(Arc::new(HttpTransport::new(
                conn.endpoint.clone(),
                conn.headers.clone(),
                Duration::from_secs(30),
            ))),
            McpTransportKind::Stdio => {
                let mut parts = conn.endpoint.split_whitespace();
                let command = parts.next().unwrap_or_default().to_string();
                let args: Vec<String> = parts.map(str::to_string).collect();
                Ok(Arc::new(StdioTransport::spawn(&command, &args, &conn.headers)?))
            }
        }
    }

    /// Persists the connection, and — if it's active — opens its transport
    /// and runs an initial health check.
    pub async fn upsert(&self, conn: McpConnection) -> Result<()> {
        self.repo.upsert(conn.clone()).await?;
        if conn.active {
            self.open_and_probe(&conn).await;
        }
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.repo.remove(id).await?;
        self.transports.write().await.remove(&id);
        self.statuses.write().await.remove(&id);
        Ok(())
    }

    /// Returns connections currently marked active.
    pub async fn list_active_by_bot(&self, bot_id: Uuid) -> Result<Vec<McpConnection>> {
        self.repo.list_active_by_bot(bot_id).await
    }

    /// Loads active connections, opens transports, lists tools for the
    /// startup health check.
    pub async fn start(&self, bot_id: Uuid) -> Result<()> {
        for conn in self.repo.list_active_by_bot(bot_id).await? {
            self.open_and_probe(&conn).await;
        }
        Ok(())
    }

    async fn open_and_probe(&self, conn: &McpConnection) {
        match Self::open_transport(conn) {
            Ok(transport) => {
                self.transports.write().await.insert(conn.id, transport);
                let status = self.probe(conn.id).await;
                self.statuses.write().await.insert(conn.id, status);
            }
            Err(e) => {
                warn!(connection = %conn.name, error = %e, "failed to open mcp transport");
                self.statuses
                    .write()
                    .await
                    .insert(conn.id, ProbeStatus::Error(e.message));
            }
        }
    }

    /// Attempts `ListTools` with the configured timeout and returns the
    /// resulting status (not cached by this call — callers decide).
    pub async fn probe(&self, connection_id: Uuid) -> ProbeStatus {
        let transport = match self.transports.read().await.get(&connection_id).cloned() {
            Some(t) => t,
            None => return ProbeStatus::Error("no open transport".to_string()),
        };

        let call = transport.call("tools/list", None);
        match tokio::time::timeout(self.probe_timeout, call).await {
            Ok(Ok(value)) => match serde_json::from_value::<ListToolsResult>(value) {
                Ok(_) => ProbeStatus::Ok,
                Err(e) => ProbeStatus::Warn(format!("unexpected tools/list shape: {e}")),
            },
            Ok(Err(e)) => ProbeStatus::Error(e.message),
            Err(_) => ProbeStatus::Error("tools/list timed out".to_string()),
        }
    }

    /// Runs a probe and caches the result.
    pub async fn probe_and_cache(&self, connection_id: Uuid) -> ProbeStatus {
        let status = self.probe(connection_id).await;
        self.statuses.write().await.insert(connection_id, status.clone());
        status
    }

    pub async fn cached_status(&self, connection_id: Uuid) -> Option<ProbeStatus> {
        self.statuses.read().await.get(&connection_id).cloned()
    }

    /// Lists tools from an open connection, with federated naming applied.
    pub async fn list_tools(&self, conn: &McpConnection) -> Result<Vec<McpToolDescriptor>> {
        let transport = {
            let guard = self.transports.read().await;
            guard.get(&conn.id).cloned()
        };
        let transport = match transport {
            Some(t) => t,
            None => {
                let t = Self::open_transport(conn)?;
                self.transports.write().await.insert(conn.id, t.clone());
                t
            }
        };

        let value = transport.call("tools/list", None).await?;
        let result: ListToolsResult = serde_json::from_value(value)
            .map_err(|e| memoh_core::error::Error::internal(format!("malformed tools/list result: {e}")))?;

        Ok(result
            .tools
            .into_iter()
            .map(|mut t| {
                t.name = conn.federated_tool_name(&t.name);
                t
            })
            .collect())
    }

    pub async fn call_tool(&self, conn: &McpConnection, local_tool_name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let transport = {
            let guard = self.transports.read().await;
            guard.get(&conn.id).cloned()
        };
        let transport = match transport {
            Some(t) => t,
            None => Self::open_transport(conn)?,
        };
        let params = serde_json::json!({ "name": local_tool_name, "arguments": arguments });
        transport.call("tools/call", Some(params)).await
    }

    /// Periodically re-probes every connection it has an open transport for.
    /// Intended to be spawned as a background task.
    pub async fn health_check_tick(&self) {
        let ids: Vec<Uuid> = self.transports.read().await.keys().copied().collect();
        for id in ids {
            let status = self.probe_and_cache(id).await;
            if matches!(status, ProbeStatus::Error(_)) {
                info!(connection = %id, "mcp connection health check failed");
            }
        }
    }
}
