//! The native session a worker holds, behind a trait.
//!
//! Handles are not thread-safe on the native side, so nothing here is
//! `Send`: a worker drives its session from a single-threaded runtime.

use crate::protocol::{AchievementFlag, StatValue};
use anyhow::Result;

pub trait SessionOpener {
    fn open(&self, app_id: u32) -> Result<Box<dyn StatsSession>>;
}

pub trait StatsSession {
    /// Lets the native layer process its event queue.
    fn run_callbacks(&mut self);

    /// A harmless read whose result only becomes stable once the session's
    /// stats have been delivered.
    fn probe(&mut self) -> Result<u64, String>;

    fn achievement(&self, api_name: &str) -> Result<bool, String>;

    fn set_achievement(&mut self, api_name: &str, unlocked: bool) -> Result<(), String>;

    fn achievement_names(&self) -> Vec<String>;

    /// Current flags as the session sees them. Unreadable flags are omitted.
    fn local_achievements(&self) -> Vec<AchievementFlag> {
        self.achievement_names()
            .into_iter()
            .filter_map(|api_name| {
                let unlocked = self.achievement(&api_name).ok()?;
                Some(AchievementFlag {
                    api_name,
                    unlocked,
                    unlocked_at: None,
                })
            })
            .collect()
    }

    /// Queues the pending changes for upload. Completion is asynchronous.
    fn store_stats(&mut self) -> Result<(), String>;

    fn stat(&self, api_name: &str) -> Option<StatValue>;

    fn set_stat(&mut self, api_name: &str, value: StatValue) -> Result<(), String>;

    fn reset_all_stats(&mut self, achievements_too: bool) -> Result<(), String>;

    /// 64-bit id of the signed-in user, if the session can report it.
    fn steam_id(&self) -> Option<u64>;
}

/// Opener for builds without the native SDK.
pub struct UnsupportedOpener;

impl SessionOpener for UnsupportedOpener {
    fn open(&self, app_id: u32) -> Result<Box<dyn StatsSession>> {
        anyhow::bail!(
            "cannot open session for app {}: built without native session support (enable the `steam` feature)",
            app_id
        )
    }
}

/// Opener selected at build time.
pub fn default_opener() -> Box<dyn SessionOpener> {
    #[cfg(feature = "steam")]
    {
        Box::new(super::steam::SteamworksOpener)
    }
    #[cfg(not(feature = "steam"))]
    {
        Box::new(UnsupportedOpener)
    }
}
