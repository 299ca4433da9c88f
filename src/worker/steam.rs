//! `steamworks`-backed session.
//!
//! The process must be started with `SteamAppId` set; the SDK reads it
//! instead of looking for `steam_appid.txt` next to the binary.

use super::provider::{SessionOpener, StatsSession};
use crate::protocol::StatValue;
use anyhow::Result;
use steamworks::{Client, SingleClient};

pub struct SteamworksOpener;

impl SessionOpener for SteamworksOpener {
    fn open(&self, app_id: u32) -> Result<Box<dyn StatsSession>> {
        let (client, single) = Client::init_app(app_id)
            .map_err(|e| anyhow::anyhow!("failed to open session for app {}: {}", app_id, e))?;
        Ok(Box::new(SteamworksSession { client, single }))
    }
}

pub struct SteamworksSession {
    client: Client,
    single: SingleClient,
}

impl StatsSession for SteamworksSession {
    fn run_callbacks(&mut self) {
        self.single.run_callbacks();
    }

    // The achievement count stays at zero and reads fail until the user's
    // stats arrive, so a stable non-zero count means writes can go through.
    fn probe(&mut self) -> Result<u64, String> {
        let stats = self.client.user_stats();
        let names = stats
            .get_achievement_names()
            .ok_or_else(|| "achievement names unavailable".to_string())?;
        let first = names
            .first()
            .ok_or_else(|| "no achievements reported yet".to_string())?;
        stats
            .achievement(first)
            .get()
            .map_err(|_| format!("achievement {} not readable yet", first))?;
        Ok(names.len() as u64)
    }

    fn achievement(&self, api_name: &str) -> Result<bool, String> {
        self.client
            .user_stats()
            .achievement(api_name)
            .get()
            .map_err(|_| format!("failed to read achievement {}", api_name))
    }

    fn set_achievement(&mut self, api_name: &str, unlocked: bool) -> Result<(), String> {
        let stats = self.client.user_stats();
        let helper = stats.achievement(api_name);
        let result = if unlocked { helper.set() } else { helper.clear() };
        result.map_err(|_| format!("failed to write achievement {}", api_name))
    }

    fn achievement_names(&self) -> Vec<String> {
        self.client
            .user_stats()
            .get_achievement_names()
            .unwrap_or_default()
    }

    fn store_stats(&mut self) -> Result<(), String> {
        self.client
            .user_stats()
            .store_stats()
            .map_err(|_| "failed to store stats".to_string())
    }

    fn stat(&self, api_name: &str) -> Option<StatValue> {
        let stats = self.client.user_stats();
        stats
            .get_stat_i32(api_name)
            .map(StatValue::Int)
            .or_else(|_| stats.get_stat_f32(api_name).map(StatValue::Float))
            .ok()
    }

    fn set_stat(&mut self, api_name: &str, value: StatValue) -> Result<(), String> {
        let stats = self.client.user_stats();
        let result = match value {
            StatValue::Int(v) => stats.set_stat_i32(api_name, v),
            StatValue::Float(v) => stats.set_stat_f32(api_name, v),
        };
        result.map_err(|_| format!("failed to write stat {}", api_name))
    }

    fn reset_all_stats(&mut self, achievements_too: bool) -> Result<(), String> {
        self.client
            .user_stats()
            .reset_all_stats(achievements_too)
            .map_err(|_| "failed to reset stats".to_string())
    }

    fn steam_id(&self) -> Option<u64> {
        Some(self.client.user().steam_id().raw())
    }
}
