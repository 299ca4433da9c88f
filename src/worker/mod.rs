//! Worker-process side of the bridge.
//!
//! A worker owns exactly one native session and answers protocol requests
//! read from stdin, one at a time, writing one response line per request to
//! stdout. Logs never touch stdout.
//!
//! States: `Uninitialized -> Initializing -> Ready`. A failed INIT is
//! terminal: the worker answers it and exits.

pub mod clock;
mod handlers;
pub mod provider;
pub mod retry;
#[cfg(feature = "steam")]
pub mod steam;

use crate::catalog::CatalogClient;
use crate::config::WorkerConfig;
use crate::protocol::{InitInfo, ResponseEnvelope, WorkerRequest};
use anyhow::{Context, Result};
use clock::Clock;
use futures::FutureExt;
use provider::{SessionOpener, StatsSession};
use serde_json::Value;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Environment variable carrying the target app id at spawn time.
pub const APP_ID_ENV: &str = "SteamAppId";

pub(crate) type SharedSession = Rc<RefCell<Box<dyn StatsSession>>>;

pub(crate) enum WorkerState {
    Uninitialized,
    Initializing,
    Ready(ReadySession),
}

pub(crate) struct ReadySession {
    info: InitInfo,
    api_key: Option<String>,
    steam_id: Option<u64>,
    session: SharedSession,
    pump: JoinHandle<()>,
    idling: bool,
}

/// What the run loop does after answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct SessionWorker {
    config: WorkerConfig,
    opener: Box<dyn SessionOpener>,
    catalog: Arc<dyn CatalogClient>,
    clock: Rc<dyn Clock>,
    env_app_id: Option<u32>,
    state: WorkerState,
}

impl SessionWorker {
    pub fn new(
        config: WorkerConfig,
        opener: Box<dyn SessionOpener>,
        catalog: Arc<dyn CatalogClient>,
        clock: Rc<dyn Clock>,
        env_app_id: Option<u32>,
    ) -> Self {
        Self {
            config,
            opener,
            catalog,
            clock,
            env_app_id,
            state: WorkerState::Uninitialized,
        }
    }

    /// Reads the spawn-time app id from the environment.
    pub fn app_id_from_env() -> Option<u32> {
        std::env::var(APP_ID_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|id| *id != 0)
    }

    /// Serves requests until input closes, `EXIT` arrives, or INIT fails.
    ///
    /// Must run inside a `LocalSet`: the callback pump is a local task.
    pub async fn run<R, W>(mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .context("Failed to read request stream")?;
            if n == 0 {
                debug!("request stream closed");
                break;
            }

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            let Some((id, parsed)) = decode_request(line) else {
                debug!("ignoring line without a request id");
                continue;
            };

            let (response, flow) = match parsed {
                Ok(request) => self.dispatch(id, request).await,
                Err(e) => (
                    ResponseEnvelope::failure(id, format!("invalid request: {}", e)),
                    Flow::Continue,
                ),
            };
            write_response(&mut output, &response).await?;
            if flow == Flow::Stop {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    async fn dispatch(&mut self, id: u64, request: WorkerRequest) -> (ResponseEnvelope, Flow) {
        let kind = request.kind();
        debug!(id, kind, "handling request");

        let (result, flow) = match AssertUnwindSafe(self.handle(request))
            .catch_unwind()
            .await
        {
            Ok(handled) => handled,
            Err(panic) => (
                Err(format!("{} handler panicked: {}", kind, panic_message(&*panic))),
                Flow::Continue,
            ),
        };

        let response = match result {
            Ok(data) => ResponseEnvelope::success(id, data),
            Err(reason) => {
                warn!(id, kind, %reason, "request failed");
                ResponseEnvelope::failure(id, reason)
            }
        };
        (response, flow)
    }

    async fn handle(&mut self, request: WorkerRequest) -> (Result<Value, String>, Flow) {
        let mut flow = Flow::Continue;
        let result = match request {
            WorkerRequest::Init {
                app_id,
                api_key,
                steam_id,
            } => {
                let result = self.init(app_id, api_key, steam_id).await;
                if result.is_err() && !self.is_ready() {
                    flow = Flow::Stop;
                }
                result.and_then(to_json)
            }
            WorkerRequest::GetAchievements => self.get_achievements().await.and_then(to_json),
            WorkerRequest::SetAchievement {
                api_name,
                unlocked,
                fast_fail,
            } => self
                .set_achievement(&api_name, unlocked, fast_fail)
                .await
                .and_then(to_json),
            WorkerRequest::SetAllAchievements { unlocked } => {
                self.set_all_achievements(unlocked).await.and_then(to_json)
            }
            WorkerRequest::GetStats => self.get_stats().await.and_then(to_json),
            WorkerRequest::SetStat { api_name, value } => self.set_stat(&api_name, value).await,
            WorkerRequest::ResetStats { achievements_too } => {
                self.reset_stats(achievements_too).await
            }
            WorkerRequest::Idle => self.idle(),
            WorkerRequest::Exit => {
                flow = Flow::Stop;
                Ok(serde_json::json!({ "exiting": true }))
            }
        };
        (result, flow)
    }

    fn is_ready(&self) -> bool {
        matches!(self.state, WorkerState::Ready(_))
    }

    fn shutdown(&mut self) {
        let state = std::mem::replace(&mut self.state, WorkerState::Uninitialized);
        if let WorkerState::Ready(ready) = state {
            ready.pump.abort();
            info!(
                app_id = ready.info.app_id,
                idling = ready.idling,
                "closing session"
            );
        }
    }
}

/// Splits a line into its id and typed request. `None` when the line is not
/// JSON or carries no numeric id.
fn decode_request(line: &str) -> Option<(u64, Result<WorkerRequest, String>)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let id = value.get("id")?.as_u64()?;
    Some((id, serde_json::from_value(value).map_err(|e| e.to_string())))
}

async fn write_response<W: AsyncWrite + Unpin>(
    output: &mut W,
    response: &ResponseEnvelope,
) -> Result<()> {
    let mut line = serde_json::to_string(response).context("Failed to encode response")?;
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .context("Failed to write response")?;
    output.flush().await.context("Failed to flush response")?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "tests/session_worker_tests.rs"]
mod tests;
