//! One running worker: its channel, its log forwarding and its exit watcher.
//!
//! All lifecycle changes go through a single `watch` state
//! (`Spawned -> Ready -> Dead`). The exit watcher is the only writer of
//! `Dead`, and it rejects every pending call before publishing it.

use super::channel::ProcessChannel;
use super::launcher::{ProcessControl, WorkerIo};
use crate::errors::BridgeError;
use crate::protocol::WorkerRequest;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the exit watcher lets the reader drain buffered responses.
const READER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Spawned,
    Ready,
    Dead(Option<i32>),
}

pub struct WorkerProcess {
    app_id: u32,
    pid: Option<u32>,
    channel: Arc<ProcessChannel>,
    state: Arc<watch::Sender<ProcessState>>,
    kill_switch: Mutex<Option<oneshot::Sender<()>>>,
}

impl WorkerProcess {
    /// Takes ownership of a launched worker's streams. Must be called inside
    /// a tokio runtime.
    pub fn start(app_id: u32, io: WorkerIo) -> Self {
        let WorkerIo {
            stdin,
            stdout,
            stderr,
            control,
        } = io;
        let pid = control.id();
        let channel = Arc::new(ProcessChannel::new(stdin));
        let (state, _) = watch::channel(ProcessState::Spawned);
        let state = Arc::new(state);
        let (kill_tx, kill_rx) = oneshot::channel();

        let reader = spawn_reader(Arc::clone(&channel), stdout);
        if let Some(stderr) = stderr {
            spawn_log_forwarder(app_id, stderr);
        }
        spawn_exit_watcher(
            app_id,
            control,
            kill_rx,
            reader,
            Arc::clone(&channel),
            Arc::clone(&state),
        );
        debug!(app_id, ?pid, "worker started");

        Self {
            app_id,
            pid,
            channel,
            state,
            kill_switch: Mutex::new(Some(kill_tx)),
        }
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.state(), ProcessState::Dead(_))
    }

    /// Records a completed INIT. No effect once the process is dead.
    pub fn mark_ready(&self) {
        self.state.send_if_modified(|state| {
            if *state == ProcessState::Spawned {
                *state = ProcessState::Ready;
                true
            } else {
                false
            }
        });
    }

    pub async fn send(&self, request: &WorkerRequest) -> Result<Value, BridgeError> {
        self.channel.send(request).await
    }

    /// Resolves once the exit watcher has seen the process go away.
    pub async fn wait_dead(&self) -> Option<i32> {
        let mut rx = self.state.subscribe();
        let code = rx
            .wait_for(|state| matches!(state, ProcessState::Dead(_)))
            .await
            .map(|state| match *state {
                ProcessState::Dead(code) => code,
                _ => None,
            });
        code.ok().flatten()
    }

    /// Rejects pending calls and force-terminates without waiting.
    pub fn terminate(&self) {
        self.channel.fail_all(BridgeError::NotRunning);
        let switch = self
            .kill_switch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(switch) = switch {
            let _ = switch.send(());
        }
    }

    /// Rejects pending calls, closes stdin and waits up to `grace` for a
    /// clean exit before forcing one.
    pub async fn kill(&self, grace: Duration) {
        self.channel.fail_all(BridgeError::NotRunning);
        self.channel.close_input().await;
        if tokio::time::timeout(grace, self.wait_dead()).await.is_err() {
            warn!(app_id = self.app_id, ?grace, "worker ignored EOF; forcing exit");
            self.terminate();
            self.wait_dead().await;
        }
    }
}

fn spawn_reader(
    channel: Arc<ProcessChannel>,
    mut stdout: Box<dyn AsyncRead + Send + Unpin>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => channel.feed(&buf[..n]),
                Err(e) => {
                    debug!(error = %e, "worker stdout read failed");
                    break;
                }
            }
        }
    })
}

fn spawn_log_forwarder(app_id: u32, stderr: Box<dyn AsyncRead + Send + Unpin>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                info!(target: "worker", app_id, "{}", line);
            }
        }
    });
}

fn spawn_exit_watcher(
    app_id: u32,
    mut control: Box<dyn ProcessControl>,
    kill_rx: oneshot::Receiver<()>,
    reader: JoinHandle<()>,
    channel: Arc<ProcessChannel>,
    state: Arc<watch::Sender<ProcessState>>,
) {
    tokio::spawn(async move {
        // A dropped kill switch counts as a kill request.
        let exited = tokio::select! {
            code = control.wait() => Some(code),
            _ = kill_rx => None,
        };
        let code = match exited {
            Some(code) => code,
            None => {
                control.kill().await;
                control.wait().await
            }
        };

        if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
            debug!(app_id, "worker stdout still open after exit");
        }
        channel.fail_all(BridgeError::ProcessExited);
        info!(app_id, ?code, "worker exited");
        state.send_replace(ProcessState::Dead(code));
    });
}
