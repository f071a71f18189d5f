//! Container Manager — one container per bot, fixed-prefix id, lifecycle and
//! versioning operations guarded by a per-container mutex table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use memoh_core::error::{Error, Result};
use memoh_core::model::{
    container_id_for_bot, Bot, ContainerRecord, ContainerRepository, ContainerStatus, Snapshot,
    SnapshotRepository, SnapshotSource, Version, VersionRepository,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::runtime::{ExecOutput, Runtime};

pub struct ContainerManagerConfig {
    pub default_image: String,
    pub snapshotter: String,
    pub stop_timeout: Duration,
}

impl Default for ContainerManagerConfig {
    fn default() -> Self {
        Self {
            default_image: "docker.io/memoh/bot-runtime:latest".to_string(),
            snapshotter: "overlayfs".to_string(),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates a bot's container lifecycle over a [`Runtime`] and the
/// container/snapshot/version repositories. Every mutating operation
/// acquires the per-container mutex before touching runtime or repository
/// state; the mutex table is keyed by container id, created lazily, and
/// never evicted (bounded by the number of active bots).
pub struct ContainerManager<R: Runtime> {
    runtime: Arc<R>,
    containers: Arc<dyn ContainerRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    versions: Arc<dyn VersionRepository>,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    config: ContainerManagerConfig,
}

impl<R: Runtime> ContainerManager<R> {
    pub fn new(
        runtime: Arc<R>,
        containers: Arc<dyn ContainerRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        versions: Arc<dyn VersionRepository>,
        config: ContainerManagerConfig,
    ) -> Self {
        Self {
            runtime,
            containers,
            snapshots,
            versions,
            locks: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn lock_for(&self, container_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(container_id) {
            return lock.clone();
        }
        let mut guard = self.locks.write().await;
        guard
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Creates the bot's container from the configured image if absent.
    /// Idempotent: calling twice for the same bot is a no-op the second time.
    pub async fn ensure_bot(&self, bot: &Bot, host_data_path: impl Into<String>) -> Result<ContainerRecord> {
        let container_id = container_id_for_bot(bot.id);
        let lock = self.lock_for(&container_id).await;
        let _guard = lock.lock().await;

        if let Ok(existing) = self.containers.get(bot.id).await {
            return Ok(existing);
        }

        let now = chrono::Utc::now();
        let record = ContainerRecord {
            bot_id: bot.id,
            container_id: container_id.clone(),
            image_ref: self.config.default_image.clone(),
            snapshotter: self.config.snapshotter.clone(),
            status: ContainerStatus::Created,
            host_data_path: host_data_path.into(),
            container_data_path: "/data".to_string(),
            auto_start: true,
            created_at: now,
            updated_at: now,
        };

        self.runtime
            .create_task(&container_id, &record.image_ref, "active")
            .await?;
        self.containers.upsert(record.clone()).await?;
        info!(container_id = %container_id, "container ensured");
        Ok(record)
    }

    /// Starts the task, then attaches CNI networking. On network failure the
    /// task is stopped so the {exists ⇒ running ∧ networked} invariant holds
    /// while the container is marked running.
    pub async fn start(&self, bot_id: uuid::Uuid) -> Result<()> {
        let mut record = self.containers.get(bot_id).await?;
        let lock = self.lock_for(&record.container_id).await;
        let _guard = lock.lock().await;

        self.runtime.start_task(&record.container_id).await?;
        if let Err(e) = self.runtime.attach_network(&record.container_id).await {
            warn!(container_id = %record.container_id, error = %e, "network attach failed, rolling back task start");
            self.runtime.signal_task(&record.container_id, true).await.ok();
            return Err(e);
        }

        record.status = ContainerStatus::Running;
        record.updated_at = chrono::Utc::now();
        self.containers.upsert(record).await
    }

    /// SIGTERM, then SIGKILL after `timeout` (or the configured default).
    pub async fn stop(&self, bot_id: uuid::Uuid, timeout: Option<Duration>) -> Result<()> {
        let mut record = self.containers.get(bot_id).await?;
        let lock = self.lock_for(&record.container_id).await;
        let _guard = lock.lock().await;

        self.runtime.signal_task(&record.container_id, false).await?;
        tokio::time::sleep(timeout.unwrap_or(self.config.stop_timeout)).await;
        self.runtime.signal_task(&record.container_id, true).await.ok();
        self.runtime.detach_network(&record.container_id).await.ok();

        record.status = ContainerStatus::Stopped;
        record.updated_at = chrono::Utc::now();
        self.containers.upsert(record).await
    }

    /// Removes network, deletes task, deletes container record, cleans up
    /// the snapshot.
    pub async fn delete(&self, bot_id: uuid::Uuid) -> Result<()> {
        let record = self.containers.get(bot_id).await?;
        let lock = self.lock_for(&record.container_id).await;
        let _guard = lock.lock().await;

        self.runtime.detach_network(&record.container_id).await.ok();
        self.runtime.delete_task(&record.container_id).await?;
        self.containers.delete(bot_id).await
    }

    /// Runs `command` inside the running container and returns captured
    /// stdout/stderr/exit code. Exit code is returned alongside success, not
    /// folded into the error path.
    pub async fn exec_with_capture(
        &self,
        bot_id: uuid::Uuid,
        command: Vec<String>,
        timeout_secs: u64,
    ) -> Result<ExecOutput> {
        let record = self.containers.get(bot_id).await.map_err(|_| {
            Error::not_found(format!("container for bot {bot_id}"))
        })?;
        if record.status != ContainerStatus::Running {
            return Err(Error::precondition_failed("container is not running"));
        }
        self.runtime.exec(&record.container_id, &command, timeout_secs).await
    }

    /// Stops the task, commits the active snapshot, prepares a new active
    /// snapshot atop the commit, recreates the container from it, and
    /// records the new version — snapshot insert and version insert commit
    /// together or not at all.
    pub async fn create_version(&self, bot_id: uuid::Uuid) -> Result<Version> {
        let record = self.containers.get(bot_id).await?;
        let lock = self.lock_for(&record.container_id).await;
        let _guard = lock.lock().await;

        self.runtime.signal_task(&record.container_id, false).await.ok();

        let next = self.versions.next_version(&record.container_id).await?;
        let snapshot_name = format!("{}-v{next}", record.container_id);

        self.runtime.commit_snapshot(&snapshot_name).await?;
        self.runtime
            .prepare_snapshot(&snapshot_name, Some("active"))
            .await?;
        self.runtime
            .create_task(&record.container_id, &record.image_ref, &snapshot_name)
            .await?;

        let snapshot = Snapshot {
            name: snapshot_name.clone(),
            container_id: record.container_id.clone(),
            parent_snapshot: Some("active".to_string()),
            snapshotter: record.snapshotter.clone(),
            source: SnapshotSource::PreExec,
            created_at: chrono::Utc::now(),
        };
        let version = Version {
            container_id: record.container_id.clone(),
            version: next,
            snapshot_name,
            created_at: chrono::Utc::now(),
        };

        self.snapshots.insert(snapshot).await?;
        self.versions.insert(version.clone()).await?;
        Ok(version)
    }

    /// Same dance as [`Self::create_version`] but against the snapshot
    /// recorded for version `n`.
    pub async fn rollback_version(&self, bot_id: uuid::Uuid, n: u32) -> Result<Version> {
        let record = self.containers.get(bot_id).await?;
        let lock = self.lock_for(&record.container_id).await;
        let _guard = lock.lock().await;

        let target = self.versions.get(&record.container_id, n).await?;

        self.runtime.signal_task(&record.container_id, false).await.ok();
        self.runtime
            .prepare_snapshot(&target.snapshot_name, None)
            .await?;
        self.runtime
            .create_task(&record.container_id, &record.image_ref, &target.snapshot_name)
            .await?;

        let next = self.versions.next_version(&record.container_id).await?;
        let snapshot = Snapshot {
            name: format!("{}-rollback-{next}", record.container_id),
            container_id: record.container_id.clone(),
            parent_snapshot: Some(target.snapshot_name.clone()),
            snapshotter: record.snapshotter.clone(),
            source: SnapshotSource::Rollback,
            created_at: chrono::Utc::now(),
        };
        let version = Version {
            container_id: record.container_id.clone(),
            version: next,
            snapshot_name: snapshot.name.clone(),
            created_at: chrono::Utc::now(),
        };

        self.snapshots.insert(snapshot).await?;
        self.versions.insert(version.clone()).await?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeRuntime;
    use memoh_core::model::{InMemoryContainerRepository, InMemorySnapshotRepository, InMemoryVersionRepository};

    fn make_manager() -> ContainerManager<FakeRuntime> {
        ContainerManager::new(
            Arc::new(FakeRuntime::new()),
            Arc::new(InMemoryContainerRepository::default()),
            Arc::new(InMemorySnapshotRepository::default()),
            Arc::new(InMemoryVersionRepository::default()),
            ContainerManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn ensure_bot_is_idempotent() {
        let mgr = make_manager();
        let bot = Bot::new("test-bot");
        let first = mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        let second = mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        assert_eq!(first.container_id, second.container_id);
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let mgr = make_manager();
        let bot = Bot::new("test-bot");
        mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        mgr.start(bot.id).await.unwrap();
        mgr.stop(bot.id, Some(Duration::from_millis(1))).await.unwrap();
        let record = mgr.containers.get(bot.id).await.unwrap();
        assert_eq!(record.status, ContainerStatus::Stopped);
    }

    #[tokio::test]
    async fn exec_requires_running_container() {
        let mgr = make_manager();
        let bot = Bot::new("test-bot");
        mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        let err = mgr
            .exec_with_capture(bot.id, vec!["echo".into(), "hi".into()], 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind, memoh_core::error::ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn exec_not_found_for_unknown_bot() {
        let mgr = make_manager();
        let err = mgr
            .exec_with_capture(uuid::Uuid::new_v4(), vec!["echo".into()], 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind, memoh_core::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_version_records_version_and_snapshot_together() {
        let mgr = make_manager();
        let bot = Bot::new("test-bot");
        mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        mgr.start(bot.id).await.unwrap();

        let v1 = mgr.create_version(bot.id).await.unwrap();
        assert_eq!(v1.version, 1);

        let record = mgr.containers.get(bot.id).await.unwrap();
        let snap = mgr.snapshots.get(&record.container_id, &v1.snapshot_name).await.unwrap();
        assert_eq!(snap.name, v1.snapshot_name);
    }

    #[tokio::test]
    async fn rollback_version_targets_recorded_snapshot() {
        let mgr = make_manager();
        let bot = Bot::new("test-bot");
        mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        mgr.start(bot.id).await.unwrap();

        let v1 = mgr.create_version(bot.id).await.unwrap();
        let _v2 = mgr.create_version(bot.id).await.unwrap();
        let v3 = mgr.rollback_version(bot.id, v1.version).await.unwrap();

        assert_eq!(v3.version, 3);
    }

    #[tokio::test]
    async fn start_rolls_back_task_on_network_failure() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_next_network_attach();
        let mgr = ContainerManager::new(
            runtime,
            Arc::new(InMemoryContainerRepository::default()),
            Arc::new(InMemorySnapshotRepository::default()),
            Arc::new(InMemoryVersionRepository::default()),
            ContainerManagerConfig::default(),
        );
        let bot = Bot::new("test-bot");
        mgr.ensure_bot(&bot, "/host/data").await.unwrap();
        let err = mgr.start(bot.id).await.unwrap_err();
        assert_eq!(err.kind, memoh_core::error::ErrorKind::Unavailable);

        let record = mgr.containers.get(bot.id).await.unwrap();
        assert_eq!(record.status, ContainerStatus::Created);
    }
}
