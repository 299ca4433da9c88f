//! Home-based storage paths for achievement-bridge persistence.
//!
//! Everything lives under `~/.achievement-bridge/`:
//! - `config.yaml` - Tuning for the bridge and its workers
//! - `settings.json` - Persisted user settings (API key, Steam root, ...)
//! - `settings.json.lock` - Advisory lock guarding settings writes
//!
//! `ACHIEVEMENT_BRIDGE_HOME` replaces the whole directory, which is how tests
//! and portable installs keep their state out of the real home directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the bridge's home directory.
const BRIDGE_DIR: &str = ".achievement-bridge";

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "ACHIEVEMENT_BRIDGE_HOME";

/// Returns the bridge home directory, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn bridge_home_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .context("Could not determine home directory for bridge storage")?
            .join(BRIDGE_DIR),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create bridge directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the default config path: `~/.achievement-bridge/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(bridge_home_dir()?.join("config.yaml"))
}

/// Returns the settings path: `~/.achievement-bridge/settings.json`
pub fn settings_path() -> Result<PathBuf> {
    Ok(bridge_home_dir()?.join("settings.json"))
}

/// Points [`bridge_home_dir`] at `dir` until the guard is dropped.
///
/// Tests using this must be `#[serial]`.
#[cfg(test)]
pub fn set_home_for_test(dir: PathBuf) -> HomeGuard {
    let previous = std::env::var_os(HOME_ENV);
    std::env::set_var(HOME_ENV, dir);
    HomeGuard { previous }
}

#[cfg(test)]
pub struct HomeGuard {
    previous: Option<std::ffi::OsString>,
}

#[cfg(test)]
impl Drop for HomeGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => std::env::set_var(HOME_ENV, value),
            None => std::env::remove_var(HOME_ENV),
        }
    }
}
