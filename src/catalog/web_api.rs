//! Steam Web API catalog over `ureq`.
//!
//! `ureq` is blocking, so every request runs on the blocking pool.

use super::{CatalogClient, GameSchema, PlayerAchievement, SchemaAchievement, SchemaStat};
use crate::config::CatalogConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct WebApiCatalog {
    agent: ureq::Agent,
    base_url: String,
}

impl WebApiCatalog {
    pub fn new(config: &CatalogConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.request_timeout()))
            .build()
            .into();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str, query: Vec<(&'static str, String)>) -> Result<Value> {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base_url, path);
        tokio::task::spawn_blocking(move || -> Result<Value> {
            let mut request = agent.get(&url);
            for (key, value) in &query {
                request = request.query(*key, value);
            }
            let body = request
                .call()
                .with_context(|| format!("Request to {} failed", url))?
                .body_mut()
                .read_to_string()
                .with_context(|| format!("Failed to read response from {}", url))?;
            serde_json::from_str(&body).with_context(|| format!("Invalid JSON from {}", url))
        })
        .await
        .context("Catalog request task failed")?
    }
}

#[async_trait]
impl CatalogClient for WebApiCatalog {
    async fn fetch_schema(&self, app_id: u32, api_key: Option<&str>) -> Result<GameSchema> {
        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .context("An API key is required to fetch the achievement schema")?;
        let body = self
            .get_json(
                "ISteamUserStats/GetSchemaForGame/v2/",
                vec![
                    ("key", key.to_string()),
                    ("appid", app_id.to_string()),
                    ("l", "english".to_string()),
                ],
            )
            .await
            .with_context(|| format!("Failed to fetch schema for app {}", app_id))?;
        let schema = parse_schema(&body);
        debug!(
            app_id,
            achievements = schema.achievements.len(),
            stats = schema.stats.len(),
            "fetched schema"
        );
        Ok(schema)
    }

    async fn fetch_global_percentages(&self, app_id: u32) -> HashMap<String, f64> {
        match self
            .get_json(
                "ISteamUserStats/GetGlobalAchievementPercentagesForApp/v0002/",
                vec![("gameid", app_id.to_string())],
            )
            .await
        {
            Ok(body) => parse_global_percentages(&body),
            Err(e) => {
                warn!(app_id, error = %e, "global percentages unavailable");
                HashMap::new()
            }
        }
    }

    async fn fetch_player_achievements(
        &self,
        app_id: u32,
        id64: u64,
        api_key: Option<&str>,
    ) -> HashMap<String, PlayerAchievement> {
        let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
            return HashMap::new();
        };
        match self
            .get_json(
                "ISteamUserStats/GetPlayerAchievements/v0001/",
                vec![
                    ("key", key.to_string()),
                    ("appid", app_id.to_string()),
                    ("steamid", id64.to_string()),
                ],
            )
            .await
        {
            Ok(body) => parse_player_achievements(&body),
            Err(e) => {
                warn!(app_id, error = %e, "player achievements unavailable");
                HashMap::new()
            }
        }
    }
}

/// Reads a number that may arrive as a JSON number or a numeric string.
fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn loose_bool(value: &Value) -> bool {
    loose_f64(value).is_some_and(|v| v != 0.0)
}

fn string_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn optional_string(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub(crate) fn parse_schema(body: &Value) -> GameSchema {
    let stats_root = &body["game"]["availableGameStats"];

    let achievements = stats_root["achievements"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let api_name = item["name"].as_str().filter(|s| !s.is_empty())?;
                    Some(SchemaAchievement {
                        api_name: api_name.to_string(),
                        display_name: string_field(item, "displayName"),
                        description: string_field(item, "description"),
                        hidden: loose_bool(&item["hidden"]),
                        icon: optional_string(item, "icon"),
                        icon_gray: optional_string(item, "icongray"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let stats = stats_root["stats"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let api_name = item["name"].as_str().filter(|s| !s.is_empty())?;
                    Some(SchemaStat {
                        api_name: api_name.to_string(),
                        display_name: string_field(item, "displayName"),
                        default_value: loose_f64(&item["defaultvalue"]).unwrap_or(0.0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    GameSchema {
        achievements,
        stats,
    }
}

pub(crate) fn parse_global_percentages(body: &Value) -> HashMap<String, f64> {
    body["achievementpercentages"]["achievements"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item["name"].as_str()?;
                    let percent = loose_f64(&item["percent"])?;
                    Some((name.to_string(), percent))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_player_achievements(body: &Value) -> HashMap<String, PlayerAchievement> {
    let stats = &body["playerstats"];
    if stats["success"].as_bool() == Some(false) {
        return HashMap::new();
    }
    stats["achievements"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item["apiname"].as_str()?;
                    let achieved = loose_bool(&item["achieved"]);
                    let unlocked_at = loose_f64(&item["unlocktime"])
                        .map(|secs| secs as i64)
                        .filter(|secs| achieved && *secs > 0)
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
                    Some((
                        name.to_string(),
                        PlayerAchievement {
                            achieved,
                            unlocked_at,
                        },
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "tests/web_api_tests.rs"]
mod tests;
