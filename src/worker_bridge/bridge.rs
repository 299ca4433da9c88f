//! The single active worker used for interactive requests.
//!
//! At most one worker is bound at a time. `ensure` serializes every
//! (re)spawn through one async mutex, so concurrent callers waiting for the
//! same session never launch two processes. A spawned worker is bound
//! before its INIT is sent, so `kill` and `stop_session_if_current` reach it
//! mid-handshake. `kill` clears the binding before it tears the process
//! down, so racing `send`s fail fast with `NotRunning` instead of reaching a
//! dying worker.

use super::launcher::WorkerLauncher;
use super::process::WorkerProcess;
use crate::config::BridgeTimings;
use crate::errors::BridgeError;
use crate::protocol::{SetAchievementOutcome, WorkerRequest, BUILD_SHA};
use crate::settings::{SettingsProvider, API_KEY, STEAM_ID};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What a worker is bound to. A change in either field forces a respawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub app_id: u32,
    pub api_key: Option<String>,
}

struct Binding {
    identity: SessionIdentity,
    process: Arc<WorkerProcess>,
    /// False until INIT succeeds; `send` only uses ready bindings.
    ready: bool,
}

pub struct WorkerBridge {
    launcher: Arc<dyn WorkerLauncher>,
    settings: Arc<dyn SettingsProvider>,
    timings: BridgeTimings,
    init_guard: tokio::sync::Mutex<()>,
    current: Mutex<Option<Binding>>,
}

impl WorkerBridge {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        settings: Arc<dyn SettingsProvider>,
        timings: BridgeTimings,
    ) -> Self {
        Self {
            launcher,
            settings,
            timings,
            init_guard: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Identity `app_id` would be bound to, given the current settings.
    pub fn identity_for(&self, app_id: u32) -> SessionIdentity {
        SessionIdentity {
            app_id,
            api_key: self
                .settings
                .get(API_KEY)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
        }
    }

    /// Makes sure a live worker is bound to `app_id` and the configured key.
    pub async fn ensure(&self, app_id: u32) -> Result<(), BridgeError> {
        let _guard = self.init_guard.lock().await;
        let identity = self.identity_for(app_id);

        let reusable = self
            .current()
            .as_ref()
            .is_some_and(|b| b.ready && b.identity == identity && b.process.is_alive());
        if reusable {
            return Ok(());
        }

        self.kill().await;
        let process = Arc::new(WorkerProcess::start(
            app_id,
            self.launcher.launch(app_id).await?,
        ));
        info!(app_id, pid = ?process.pid(), "spawned session worker");
        *self.current() = Some(Binding {
            identity: identity.clone(),
            process: Arc::clone(&process),
            ready: false,
        });

        let init = WorkerRequest::Init {
            app_id,
            api_key: identity.api_key.clone(),
            steam_id: self
                .settings
                .get(STEAM_ID)
                .and_then(|id| id.trim().parse().ok()),
        };
        // The timer lives inside this expression; it cannot outlive the race.
        let outcome = tokio::time::timeout(self.timings.init_timeout(), process.send(&init)).await;
        match outcome {
            Ok(Ok(data)) => {
                check_build(app_id, &data);
                if self.mark_bound_ready(&process) {
                    Ok(())
                } else {
                    debug!(app_id, "worker was stopped during INIT");
                    Err(BridgeError::NotRunning)
                }
            }
            Ok(Err(e)) => {
                if self.release(&process) {
                    warn!(app_id, error = %e, "worker INIT failed");
                    process.kill(self.timings.kill_grace()).await;
                }
                Err(e)
            }
            Err(_) => {
                if self.release(&process) {
                    warn!(app_id, timeout = ?self.timings.init_timeout(), "worker INIT timed out; terminating");
                    process.terminate();
                    process.wait_dead().await;
                }
                Err(BridgeError::Timeout(self.timings.init_timeout()))
            }
        }
    }

    /// Forwards to the bound worker.
    pub async fn send(&self, request: &WorkerRequest) -> Result<Value, BridgeError> {
        let process = self
            .current()
            .as_ref()
            .filter(|b| b.ready)
            .map(|b| Arc::clone(&b.process))
            .ok_or(BridgeError::NotRunning)?;
        process.send(request).await
    }

    /// `ensure` followed by `send`.
    pub async fn call(&self, app_id: u32, request: &WorkerRequest) -> Result<Value, BridgeError> {
        self.ensure(app_id).await?;
        self.send(request).await
    }

    /// Typed variant of [`call`](Self::call).
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        app_id: u32,
        request: &WorkerRequest,
    ) -> Result<T, BridgeError> {
        decode(request, self.call(app_id, request).await?)
    }

    /// Writes one achievement. A worker that never received its stats is
    /// replaced once, and the write is repeated on the fresh worker with
    /// fast-fail disabled.
    pub async fn set_achievement(
        &self,
        app_id: u32,
        api_name: &str,
        unlocked: bool,
    ) -> Result<SetAchievementOutcome, BridgeError> {
        let request = |fast_fail| WorkerRequest::SetAchievement {
            api_name: api_name.to_string(),
            unlocked,
            fast_fail,
        };

        let first = request(true);
        match self.call(app_id, &first).await {
            Err(BridgeError::StatsNotReady) => {
                warn!(app_id, api_name, "worker never received stats; respawning once");
                self.stop_session_if_current(Some(app_id)).await;
                tokio::time::sleep(self.timings.respawn_settle()).await;
                self.call_as(app_id, &request(false)).await
            }
            other => decode(&first, other?),
        }
    }

    /// Tears down the bound worker, if any, including one still in INIT.
    /// Idempotent.
    pub async fn kill(&self) {
        let binding = self.current().take();
        if let Some(binding) = binding {
            info!(app_id = binding.identity.app_id, "stopping session worker");
            binding.process.kill(self.timings.kill_grace()).await;
        }
    }

    /// Kills the bound worker only if it belongs to `app_id`; `None` matches
    /// any binding. A worker still in INIT counts as bound. Returns whether a
    /// worker was stopped.
    pub async fn stop_session_if_current(&self, app_id: Option<u32>) -> bool {
        let binding = {
            let mut current = self.current();
            let matches = match (current.as_ref(), app_id) {
                (Some(binding), Some(id)) => binding.identity.app_id == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if matches {
                current.take()
            } else {
                None
            }
        };
        match binding {
            Some(binding) => {
                info!(app_id = binding.identity.app_id, "stopping session worker");
                binding.process.kill(self.timings.kill_grace()).await;
                true
            }
            None => {
                debug!(?app_id, "stop ignored; session is not current");
                false
            }
        }
    }

    /// App id of the ready worker, if any.
    pub fn current_app_id(&self) -> Option<u32> {
        self.current()
            .as_ref()
            .filter(|b| b.ready)
            .map(|b| b.identity.app_id)
    }

    /// Flags `process` ready if it is still the bound worker.
    fn mark_bound_ready(&self, process: &Arc<WorkerProcess>) -> bool {
        let mut current = self.current();
        match current.as_mut() {
            Some(binding) if Arc::ptr_eq(&binding.process, process) => {
                process.mark_ready();
                binding.ready = true;
                true
            }
            _ => false,
        }
    }

    /// Unbinds `process` if it is still the bound worker. False means a
    /// concurrent stop already took it and owns the teardown.
    fn release(&self, process: &Arc<WorkerProcess>) -> bool {
        let mut current = self.current();
        let bound = current
            .as_ref()
            .is_some_and(|b| Arc::ptr_eq(&b.process, process));
        if bound {
            current.take();
        }
        bound
    }

    fn current(&self) -> MutexGuard<'_, Option<Binding>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn decode<T: DeserializeOwned>(request: &WorkerRequest, data: Value) -> Result<T, BridgeError> {
    serde_json::from_value(data).map_err(|e| {
        BridgeError::Worker(format!("unexpected {} response: {}", request.kind(), e))
    })
}

fn check_build(app_id: u32, init: &Value) {
    match init.get("buildSha").and_then(Value::as_str) {
        Some(sha) if sha != BUILD_SHA => warn!(
            app_id,
            worker = sha,
            controller = BUILD_SHA,
            "worker build differs from controller; restart to pick up the new binary"
        ),
        Some(_) => {}
        None => debug!(app_id, "worker did not report a build"),
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
