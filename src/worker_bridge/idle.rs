//! Background workers that keep sessions open ("idling").
//!
//! Each entry is an independent worker started with a fire-and-forget
//! INIT + IDLE handshake. A worker that exits on its own removes its entry.

use super::launcher::WorkerLauncher;
use super::process::WorkerProcess;
use crate::errors::BridgeError;
use crate::protocol::WorkerRequest;
use crate::settings::{SettingsProvider, API_KEY};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// A session currently idling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleSession {
    pub app_id: u32,
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

struct IdleEntry {
    name: String,
    started_at: DateTime<Utc>,
    process: Arc<WorkerProcess>,
}

type Entries = Arc<Mutex<HashMap<u32, IdleEntry>>>;

pub struct IdleSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    settings: Arc<dyn SettingsProvider>,
    entries: Entries,
    start_guard: tokio::sync::Mutex<()>,
}

impl IdleSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            launcher,
            settings,
            entries: Arc::new(Mutex::new(HashMap::new())),
            start_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Starts idling `app_id`. Returns `false` if it already was.
    pub async fn start(&self, app_id: u32, name: &str) -> Result<bool, BridgeError> {
        let _guard = self.start_guard.lock().await;
        if lock(&self.entries).contains_key(&app_id) {
            return Ok(false);
        }

        let process = Arc::new(WorkerProcess::start(
            app_id,
            self.launcher.launch(app_id).await?,
        ));
        lock(&self.entries).insert(
            app_id,
            IdleEntry {
                name: name.to_string(),
                started_at: Utc::now(),
                process: Arc::clone(&process),
            },
        );
        info!(app_id, name, pid = ?process.pid(), "idling started");

        let api_key = self.settings.get(API_KEY).filter(|k| !k.trim().is_empty());
        tokio::spawn(handshake(Arc::clone(&process), app_id, api_key));
        tokio::spawn(remove_on_exit(Arc::clone(&self.entries), process));
        Ok(true)
    }

    /// Stops idling `app_id`. Returns `false` if it was not idling.
    pub async fn stop(&self, app_id: u32) -> bool {
        let entry = lock(&self.entries).remove(&app_id);
        match entry {
            Some(entry) => {
                entry.process.kill(Duration::ZERO).await;
                info!(app_id, name = %entry.name, "idling stopped");
                true
            }
            None => false,
        }
    }

    /// Stops every idling session and returns how many there were.
    pub async fn stop_all(&self) -> usize {
        let app_ids: Vec<u32> = lock(&self.entries).keys().copied().collect();
        let mut stopped = 0;
        for app_id in app_ids {
            if self.stop(app_id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn list(&self) -> Vec<IdleSession> {
        let mut sessions: Vec<IdleSession> = lock(&self.entries)
            .iter()
            .map(|(app_id, entry)| IdleSession {
                app_id: *app_id,
                name: entry.name.clone(),
                started_at: entry.started_at,
                pid: entry.process.pid(),
            })
            .collect();
        sessions.sort_by_key(|s| s.app_id);
        sessions
    }

    pub fn is_idling(&self, app_id: u32) -> bool {
        lock(&self.entries).contains_key(&app_id)
    }
}

async fn handshake(process: Arc<WorkerProcess>, app_id: u32, api_key: Option<String>) {
    let init = WorkerRequest::Init {
        app_id,
        api_key,
        steam_id: None,
    };
    if let Err(e) = process.send(&init).await {
        warn!(app_id, error = %e, "idle worker INIT failed");
        return;
    }
    process.mark_ready();
    if let Err(e) = process.send(&WorkerRequest::Idle).await {
        warn!(app_id, error = %e, "idle worker did not start idling");
    }
}

async fn remove_on_exit(entries: Entries, process: Arc<WorkerProcess>) {
    let code = process.wait_dead().await;
    let app_id = process.app_id();
    let mut entries = lock(&entries);
    let same = entries
        .get(&app_id)
        .is_some_and(|entry| Arc::ptr_eq(&entry.process, &process));
    if same {
        entries.remove(&app_id);
        info!(app_id, ?code, "idle worker exited on its own");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
#[path = "tests/idle_tests.rs"]
mod tests;
