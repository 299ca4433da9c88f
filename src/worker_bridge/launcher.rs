//! Spawning worker processes.

use crate::errors::BridgeError;
use crate::worker::APP_ID_ENV;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Hidden CLI flag that turns the binary into a session worker.
pub const WORKER_FLAG: &str = "--internal-session-worker";

/// Second identity variable the native runtime reads.
pub const GAME_ID_ENV: &str = "SteamGameId";

/// The streams and process handle of a freshly launched worker.
pub struct WorkerIo {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Log side channel, if captured.
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub control: Box<dyn ProcessControl>,
}

/// Lifecycle handle of a launched worker.
#[async_trait]
pub trait ProcessControl: Send {
    /// Resolves when the process has exited, with its exit code if any.
    async fn wait(&mut self) -> Option<i32>;

    /// Forcibly terminates the process.
    async fn kill(&mut self);

    fn id(&self) -> Option<u32>;
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, app_id: u32) -> Result<WorkerIo, BridgeError>;
}

/// Launches workers as child processes of this binary.
pub struct ProcessLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            config_path,
        }
    }

    /// Launcher re-executing the running binary in worker mode.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the running executable")?;
        Ok(Self::new(program, config_path))
    }

    fn command(&self, app_id: u32) -> Command {
        let mut command = Command::new(&self.program);
        command.arg(WORKER_FLAG);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .env(APP_ID_ENV, app_id.to_string())
            .env(GAME_ID_ENV, app_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, app_id: u32) -> Result<WorkerIo, BridgeError> {
        let mut child = self.command(app_id).spawn().map_err(|e| {
            BridgeError::Launch(format!("{}: {}", self.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Launch("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Launch("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);

        Ok(WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr,
            control: Box::new(ChildControl { child }),
        })
    }
}

struct ChildControl {
    child: Child,
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await.ok().and_then(|status| status.code())
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
