//! `Runtime` — the seam between the Container Manager and the actual
//! containerd/CNI plumbing, which lives out of tree. A production build
//! supplies a containerd-backed implementation; tests use [`FakeRuntime`].

use async_trait::async_trait;
use memoh_core::error::Result;

#[derive(Clone, Debug)]
pub struct TaskHandle {
    pub container_id: String,
    pub pid: u32,
}

#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create_task(&self, container_id: &str, image_ref: &str, snapshot: &str) -> Result<TaskHandle>;
    async fn start_task(&self, container_id: &str) -> Result<()>;
    async fn signal_task(&self, container_id: &str, sigkill: bool) -> Result<()>;
    async fn attach_network(&self, container_id: &str) -> Result<()>;
    async fn detach_network(&self, container_id: &str) -> Result<()>;
    async fn prepare_snapshot(&self, name: &str, parent: Option<&str>) -> Result<()>;
    async fn commit_snapshot(&self, name: &str) -> Result<()>;
    async fn exec(&self, container_id: &str, command: &[String], timeout_secs: u64) -> Result<ExecOutput>;
    async fn delete_task(&self, container_id: &str) -> Result<()>;
}

/// In-memory fake used by the Container Manager's tests and by `serve`'s
/// default wiring when no containerd socket is reachable.
#[derive(Default)]
pub struct FakeRuntime {
    fail_network: std::sync::atomic::AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `attach_network` call fail, for testing the
    /// stop-on-network-failure rollback path.
    pub fn fail_next_network_attach(&self) {
        self.fail_network.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn create_task(&self, container_id: &str, _image_ref: &str, _snapshot: &str) -> Result<TaskHandle> {
        Ok(TaskHandle { container_id: container_id.to_string(), pid: 1 })
    }

    async fn start_task(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn signal_task(&self, _container_id: &str, _sigkill: bool) -> Result<()> {
        Ok(())
    }

    async fn attach_network(&self, _container_id: &str) -> Result<()> {
        if self.fail_network.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Err(memoh_core::error::Error::unavailable("cni network attach failed"));
        }
        Ok(())
    }

    async fn detach_network(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }

    async fn prepare_snapshot(&self, _name: &str, _parent: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn commit_snapshot(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn exec(&self, _container_id: &str, command: &[String], _timeout_secs: u64) -> Result<ExecOutput> {
        Ok(ExecOutput {
            stdout: format!("ran: {}\n", command.join(" ")).into_bytes(),
            stderr: Vec::new(),
            exit_code: 0,
        })
    }

    async fn delete_task(&self, _container_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_runtime_exec_echoes_command() {
        let rt = FakeRuntime::new();
        let out = rt.exec("c1", &["echo".into(), "hi".into()], 5).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(String::from_utf8_lossy(&out.stdout).contains("echo hi"));
    }

    #[tokio::test]
    async fn fake_runtime_network_failure_is_one_shot() {
        let rt = FakeRuntime::new();
        rt.fail_next_network_attach();
        assert!(rt.attach_network("c1").await.is_err());
        assert!(rt.attach_network("c1").await.is_ok());
    }
}
