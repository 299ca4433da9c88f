//! Outbound catalog lookups (schema, global percentages, per-player state).
//!
//! Schema failures are surfaced to the caller; the two enrichment lookups are
//! best-effort and come back empty when the network or API says no.

pub mod web_api;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use web_api::WebApiCatalog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaAchievement {
    pub api_name: String,
    pub display_name: String,
    pub description: String,
    pub hidden: bool,
    pub icon: Option<String>,
    pub icon_gray: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStat {
    pub api_name: String,
    pub display_name: String,
    pub default_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSchema {
    pub achievements: Vec<SchemaAchievement>,
    pub stats: Vec<SchemaStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAchievement {
    pub achieved: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Full achievement and stat schema. Requires an API key.
    async fn fetch_schema(&self, app_id: u32, api_key: Option<&str>) -> Result<GameSchema>;

    /// Global unlock percentage per achievement; empty on failure.
    async fn fetch_global_percentages(&self, app_id: u32) -> HashMap<String, f64>;

    /// Unlock state for one player; empty on failure.
    async fn fetch_player_achievements(
        &self,
        app_id: u32,
        id64: u64,
        api_key: Option<&str>,
    ) -> HashMap<String, PlayerAchievement>;
}

/// Canned catalog for tests.
#[cfg(test)]
#[derive(Default)]
pub struct StaticCatalog {
    pub schema: Option<GameSchema>,
    pub percentages: HashMap<String, f64>,
    pub player: HashMap<String, PlayerAchievement>,
}

#[cfg(test)]
#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn fetch_schema(&self, _app_id: u32, api_key: Option<&str>) -> Result<GameSchema> {
        if api_key.is_none() {
            anyhow::bail!("an API key is required to fetch the schema");
        }
        self.schema
            .clone()
            .ok_or_else(|| anyhow::anyhow!("schema request failed"))
    }

    async fn fetch_global_percentages(&self, _app_id: u32) -> HashMap<String, f64> {
        self.percentages.clone()
    }

    async fn fetch_player_achievements(
        &self,
        _app_id: u32,
        _id64: u64,
        _api_key: Option<&str>,
    ) -> HashMap<String, PlayerAchievement> {
        self.player.clone()
    }
}
