//! The façade a front end talks to.
//!
//! Every operation answers with a [`ClientResponse`] envelope; failures from
//! the manifest reader, the bridge and the settings store are flattened into
//! its `error` string.

use crate::errors::BridgeError;
use crate::manifest::{self, LoggedInUser, ManifestEntry};
use crate::protocol::{
    AchievementView, SetAchievementOutcome, SetAllOutcome, StatValue, StatView, WorkerRequest,
};
use crate::settings::{SettingsProvider, STEAM_ID, STEAM_ROOT};
use crate::worker_bridge::{IdleSession, IdleSupervisor, WorkerBridge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when repeating the same call can reasonably succeed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl<T> ClientResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: false,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            retryable: false,
        }
    }

    /// Failure envelope for a bridge error, tagged with its retry class.
    pub fn from_error(error: &BridgeError) -> Self {
        Self {
            retryable: error.is_retryable(),
            ..Self::err(error.to_string())
        }
    }
}

impl<T> From<Result<T, BridgeError>> for ClientResponse<T> {
    fn from(result: Result<T, BridgeError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

impl<T> From<anyhow::Result<T>> for ClientResponse<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(format!("{:#}", e)),
        }
    }
}

pub struct SessionClient {
    settings: Arc<dyn SettingsProvider>,
    bridge: Arc<WorkerBridge>,
    idle: Arc<IdleSupervisor>,
    steam_root_override: Option<PathBuf>,
}

impl SessionClient {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        bridge: Arc<WorkerBridge>,
        idle: Arc<IdleSupervisor>,
        steam_root_override: Option<PathBuf>,
    ) -> Self {
        Self {
            settings,
            bridge,
            idle,
            steam_root_override,
        }
    }

    /// Installation root: explicit override, then the `steamRoot` setting,
    /// then platform discovery.
    pub fn steam_root(&self) -> Result<PathBuf, BridgeError> {
        if let Some(root) = &self.steam_root_override {
            return Ok(root.clone());
        }
        if let Some(root) = self.settings.get(STEAM_ROOT).filter(|r| !r.trim().is_empty()) {
            return Ok(PathBuf::from(root.trim()));
        }
        manifest::find_session_root()
    }

    pub fn list_games(&self) -> ClientResponse<Vec<ManifestEntry>> {
        self.steam_root()
            .map(|root| manifest::list_installed_entries(&root))
            .into()
    }

    pub fn list_users(&self) -> ClientResponse<Vec<LoggedInUser>> {
        self.steam_root()
            .map(|root| manifest::list_logged_in_users(&root))
            .into()
    }

    pub async fn get_achievements(&self, app_id: u32) -> ClientResponse<Vec<AchievementView>> {
        self.bridge
            .call_as(app_id, &WorkerRequest::GetAchievements)
            .await
            .into()
    }

    /// Succeeds only when the value read back matches the value written.
    pub async fn set_achievement(
        &self,
        app_id: u32,
        api_name: &str,
        unlocked: bool,
    ) -> ClientResponse<SetAchievementOutcome> {
        match self.bridge.set_achievement(app_id, api_name, unlocked).await {
            Ok(outcome) if outcome.confirmed() => ClientResponse::ok(outcome),
            Ok(outcome) => ClientResponse {
                success: false,
                data: Some(outcome),
                error: Some(format!(
                    "{} still reads {} after writing {}",
                    api_name, outcome.verified, outcome.expected
                )),
                retryable: true,
            },
            Err(e) => ClientResponse::from_error(&e),
        }
    }

    pub async fn set_all_achievements(
        &self,
        app_id: u32,
        unlocked: bool,
    ) -> ClientResponse<SetAllOutcome> {
        self.bridge
            .call_as(app_id, &WorkerRequest::SetAllAchievements { unlocked })
            .await
            .into()
    }

    pub async fn get_stats(&self, app_id: u32) -> ClientResponse<Vec<StatView>> {
        self.bridge
            .call_as(app_id, &WorkerRequest::GetStats)
            .await
            .into()
    }

    pub async fn set_stat(&self, app_id: u32, api_name: &str, value: StatValue) -> ClientResponse<Value> {
        let request = WorkerRequest::SetStat {
            api_name: api_name.to_string(),
            value,
        };
        self.bridge.call(app_id, &request).await.into()
    }

    pub async fn reset_stats(&self, app_id: u32, achievements_too: bool) -> ClientResponse<Value> {
        self.bridge
            .call(app_id, &WorkerRequest::ResetStats { achievements_too })
            .await
            .into()
    }

    /// Starts idling `app_id`, named after its manifest when installed.
    pub async fn start_idle(&self, app_id: u32) -> ClientResponse<bool> {
        let name = self.app_name(app_id);
        self.idle.start(app_id, &name).await.into()
    }

    pub async fn stop_idle(&self, app_id: u32) -> ClientResponse<bool> {
        ClientResponse::ok(self.idle.stop(app_id).await)
    }

    pub async fn stop_all_idle(&self) -> ClientResponse<usize> {
        ClientResponse::ok(self.idle.stop_all().await)
    }

    pub fn list_idle(&self) -> ClientResponse<Vec<IdleSession>> {
        ClientResponse::ok(self.idle.list())
    }

    /// Releases the interactive session when the caller leaves `app_id`.
    pub async fn close_session(&self, app_id: Option<u32>) -> ClientResponse<bool> {
        let current = self.bridge.current_app_id();
        let stopped = self.bridge.stop_session_if_current(app_id).await;
        debug!(requested = ?app_id, ?current, stopped, "close session");
        ClientResponse::ok(stopped)
    }

    /// Stops every worker this client owns.
    pub async fn shutdown(&self) {
        self.bridge.kill().await;
        let stopped = self.idle.stop_all().await;
        debug!(stopped, "session client shut down");
    }

    pub fn get_setting(&self, key: &str) -> ClientResponse<Option<String>> {
        ClientResponse::ok(self.settings.get(key))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> ClientResponse<()> {
        if key == STEAM_ID && value.trim().parse::<u64>().is_err() {
            return ClientResponse::err(format!("{} must be a 64-bit numeric id", STEAM_ID));
        }
        self.settings.set(key, value.trim()).into()
    }

    pub fn unset_setting(&self, key: &str) -> ClientResponse<()> {
        self.settings.remove(key).into()
    }

    fn app_name(&self, app_id: u32) -> String {
        self.steam_root()
            .ok()
            .and_then(|root| {
                manifest::list_installed_entries(&root)
                    .into_iter()
                    .find(|entry| entry.app_id == app_id)
            })
            .map(|entry| entry.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("App {}", app_id))
    }
}

#[cfg(test)]
#[path = "tests/session_client_tests.rs"]
mod tests;
