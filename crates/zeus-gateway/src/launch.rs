//! Worker launch backends.
//!
//! Two ways to run a worker behind one interface: Docker containers (the
//! authoritative variant, with port mapping and bind mounts) and plain
//! subprocesses (a degenerate simplification with no image and no mounts).
//! The supervisor only sees [`WorkerBackend`] and [`WorkerProcess`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use zeus_core::config::WORKER_NAME_PREFIX;
use zeus_core::{Result, ZeusError};

/// Lines of worker output retained per worker for `get_logs`.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// Everything a backend needs to launch one worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub worker_id: String,
    pub provider: String,
    /// Host-side port the gateway connects to
    pub host_port: u16,
    /// Port the worker listens on inside its container/process
    pub inner_port: u16,
    pub model: Option<String>,
    /// Container image (container backend)
    pub image: Option<String>,
    /// Launcher command (subprocess backend)
    pub command: Option<PathBuf>,
    pub workspace: PathBuf,
    pub prompts_dir: PathBuf,
    /// Environment variable names forwarded from the gateway's environment
    pub env_keys: Vec<String>,
    pub debug: bool,
}

impl LaunchSpec {
    /// Environment passed to the worker. `port` and the directory paths are
    /// backend-dependent (in-container paths vs host paths).
    fn base_env(&self, port: u16, workspace: &str, prompts: &str) -> Vec<(String, String)> {
        let mut env = vec![
            ("PORT".to_string(), port.to_string()),
            ("WORKSPACE".to_string(), workspace.to_string()),
            ("PROMPTS_DIR".to_string(), prompts.to_string()),
            ("ZEUS_WORKER_ID".to_string(), self.worker_id.clone()),
            ("ZEUS_PROVIDER".to_string(), self.provider.clone()),
        ];
        if let Some(model) = &self.model {
            env.push(("ZEUS_MODEL".to_string(), model.clone()));
        }
        if self.debug {
            env.push(("ZEUS_DEBUG".to_string(), "1".to_string()));
        }
        for key in &self.env_keys {
            if let Ok(value) = std::env::var(key) {
                env.push((key.clone(), value));
            }
        }
        env
    }
}

/// A launched worker process, owned by its supervisor.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// OS-level liveness (process running / container up).
    async fn is_alive(&self) -> bool;

    /// Graceful termination signal. Does not wait for exit.
    async fn terminate(&self) -> Result<()>;

    /// Forceful kill.
    async fn kill(&self) -> Result<()>;

    /// Remove any remaining OS artifact after exit.
    async fn cleanup(&self) -> Result<()>;

    /// Last `tail` lines of worker output.
    async fn logs(&self, tail: usize) -> Result<Vec<String>>;
}

/// Launches workers and cleans up stale artifacts from previous runs.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>>;

    /// Remove stale artifacts matching the gateway's naming prefix.
    /// Returns the number removed. Called once at gateway start.
    async fn cleanup_stale(&self) -> Result<usize>;
}

// =============================================================================
// Shared log ring buffer
// =============================================================================

/// Bounded ring buffer of worker output lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<StdMutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(StdMutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().rev().take(n).rev().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

// =============================================================================
// Subprocess backend
// =============================================================================

/// Runs workers as plain subprocesses. The worker listens directly on the
/// host port; no port mapping or mounts are involved.
#[derive(Debug, Default)]
pub struct SubprocessBackend;

struct SubprocessWorker {
    worker_id: String,
    child: Mutex<tokio::process::Child>,
    pid: Option<u32>,
    logs: LogBuffer,
}

#[async_trait]
impl WorkerBackend for SubprocessBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
        let command = spec.command.clone().ok_or_else(|| {
            ZeusError::launch(
                &spec.worker_id,
                format!("provider {} has no launcher command configured", spec.provider),
            )
        })?;

        let workspace = spec.workspace.display().to_string();
        let prompts = spec.prompts_dir.display().to_string();

        let mut cmd = Command::new(&command);
        cmd.current_dir(&spec.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in spec.base_env(spec.host_port, &workspace, &prompts) {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ZeusError::launch(
                &spec.worker_id,
                format!("failed to spawn {}: {e}", command.display()),
            )
        })?;
        let pid = child.id();

        let logs = LogBuffer::default();
        if let Some(stdout) = child.stdout.take() {
            spawn_log_pump(stdout, logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_pump(stderr, logs.clone());
        }

        info!(worker_id = %spec.worker_id, pid = ?pid, "subprocess worker launched");
        Ok(Box::new(SubprocessWorker {
            worker_id: spec.worker_id.clone(),
            child: Mutex::new(child),
            pid,
            logs,
        }))
    }

    async fn cleanup_stale(&self) -> Result<usize> {
        // Subprocesses die with the gateway; nothing persists across runs.
        Ok(0)
    }
}

fn spawn_log_pump<R>(reader: R, logs: LogBuffer)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push(line);
        }
    });
}

#[async_trait]
impl WorkerProcess for SubprocessWorker {
    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn terminate(&self) -> Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
                ZeusError::internal(format!("SIGTERM to {} failed: {e}", self.worker_id))
            })?;
            return Ok(());
        }
        // No pid (already reaped) or non-unix: fall through to kill.
        self.kill().await
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        match child.kill().await {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ZeusError::internal(format!(
                "kill {} failed: {e}",
                self.worker_id
            ))),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        // Reap the exit status so the child doesn't linger as a zombie.
        let mut child = self.child.lock().await;
        let _ = child.try_wait();
        Ok(())
    }

    async fn logs(&self, tail: usize) -> Result<Vec<String>> {
        Ok(self.logs.tail(tail))
    }
}

// =============================================================================
// Container backend
// =============================================================================

/// Runs workers as Docker containers: `hostPort:innerPort` mapping, the
/// workspace bind-mounted read/write, the prompts directory read-only.
#[derive(Debug)]
pub struct ContainerBackend {
    docker: String,
    stop_grace_secs: u64,
}

impl ContainerBackend {
    pub fn new(stop_grace_secs: u64) -> Self {
        Self {
            docker: "docker".to_string(),
            stop_grace_secs,
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.docker)
            .args(args)
            .output()
            .await
            .map_err(|e| ZeusError::internal(format!("docker {}: {e}", args.join(" "))))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZeusError::internal(format!(
                "docker {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct ContainerWorker {
    backend_docker: String,
    name: String,
    stop_grace_secs: u64,
}

impl ContainerWorker {
    async fn docker(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.backend_docker)
            .args(args)
            .output()
            .await
            .map_err(|e| ZeusError::internal(format!("docker {}: {e}", args.join(" "))))
    }
}

#[async_trait]
impl WorkerBackend for ContainerBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
        let image = spec.image.clone().ok_or_else(|| {
            ZeusError::launch(
                &spec.worker_id,
                format!("provider {} has no container image configured", spec.provider),
            )
        })?;

        let port_map = format!("{}:{}", spec.host_port, spec.inner_port);
        let workspace_mount = format!("{}:/workspace", spec.workspace.display());
        let prompts_mount = format!("{}:/prompts:ro", spec.prompts_dir.display());

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.worker_id.clone(),
            "-p".into(),
            port_map,
            "-v".into(),
            workspace_mount,
            "-v".into(),
            prompts_mount,
        ];
        for (key, value) in spec.base_env(spec.inner_port, "/workspace", "/prompts") {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(image);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(&arg_refs)
            .await
            .map_err(|e| ZeusError::launch(&spec.worker_id, e.to_string()))?;

        info!(worker_id = %spec.worker_id, port = spec.host_port, "container worker launched");
        Ok(Box::new(ContainerWorker {
            backend_docker: self.docker.clone(),
            name: spec.worker_id.clone(),
            stop_grace_secs: self.stop_grace_secs,
        }))
    }

    async fn cleanup_stale(&self) -> Result<usize> {
        let filter = format!("name={WORKER_NAME_PREFIX}");
        let listing = self
            .docker(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;

        let mut removed = 0;
        for name in listing.lines().map(str::trim).filter(|n| !n.is_empty()) {
            match self.docker(&["rm", "-f", name]).await {
                Ok(_) => {
                    warn!(container = name, "removed stale worker container");
                    removed += 1;
                }
                Err(e) => warn!(container = name, error = %e, "failed to remove stale container"),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl WorkerProcess for ContainerWorker {
    async fn is_alive(&self) -> bool {
        match self
            .docker(&["inspect", "-f", "{{.State.Running}}", &self.name])
            .await
        {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            _ => false,
        }
    }

    async fn terminate(&self) -> Result<()> {
        let grace = self.stop_grace_secs.to_string();
        let output = self.docker(&["stop", "-t", &grace, &self.name]).await?;
        if output.status.success() {
            debug!(container = %self.name, "container stopped");
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let _ = self.docker(&["kill", &self.name]).await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let _ = self.docker(&["rm", "-f", &self.name]).await?;
        Ok(())
    }

    async fn logs(&self, tail: usize) -> Result<Vec<String>> {
        let tail_arg = tail.to_string();
        let output = self
            .docker(&["logs", "--tail", &tail_arg, &self.name])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZeusError::internal(format!(
                "docker logs {} failed: {}",
                self.name,
                stderr.trim()
            )));
        }
        // docker writes container stderr to our stderr stream; merge both.
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        Ok(lines)
    }
}
