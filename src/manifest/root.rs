use crate::errors::BridgeError;
use std::path::{Path, PathBuf};

/// Locates the Steam installation directory.
///
/// On Windows the registry's `SteamPath` wins, followed by the default
/// install locations. Everywhere else a fixed list of candidates is probed.
pub fn find_session_root() -> Result<PathBuf, BridgeError> {
    let mut candidates = Vec::new();
    #[cfg(windows)]
    {
        if let Some(path) = registry_steam_path() {
            candidates.push(path);
        }
    }
    candidates.extend(default_candidates());
    find_session_root_in(&candidates)
}

/// Returns the first candidate that exists as a directory.
pub fn find_session_root_in(candidates: &[PathBuf]) -> Result<PathBuf, BridgeError> {
    candidates
        .iter()
        .find(|path| path.is_dir())
        .cloned()
        .ok_or_else(|| BridgeError::NotFound("Steam installation".to_string()))
}

#[cfg(windows)]
fn default_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\Program Files (x86)\Steam"),
        PathBuf::from(r"C:\Program Files\Steam"),
    ]
}

#[cfg(target_os = "macos")]
fn default_candidates() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| vec![home.join("Library/Application Support/Steam")])
        .unwrap_or_default()
}

#[cfg(not(any(windows, target_os = "macos")))]
fn default_candidates() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    vec![
        home.join(".steam/steam"),
        home.join(".local/share/Steam"),
        home.join(".steam/root"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
        home.join("snap/steam/common/.local/share/Steam"),
    ]
}

/// Reads `HKCU\Software\Valve\Steam\SteamPath` via `reg query`.
#[cfg(windows)]
fn registry_steam_path() -> Option<PathBuf> {
    let output = std::process::Command::new("reg")
        .args(["query", r"HKCU\Software\Valve\Steam", "/v", "SteamPath"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_reg_query_value(&String::from_utf8_lossy(&output.stdout), "SteamPath")
}

/// Extracts a `REG_SZ` value from `reg query` output.
#[cfg_attr(not(windows), allow(unused))]
fn parse_reg_query_value(output: &str, name: &str) -> Option<PathBuf> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != name {
            return None;
        }
        if !parts.next()?.starts_with("REG_") {
            return None;
        }
        let value = parts.collect::<Vec<_>>().join(" ");
        if value.is_empty() {
            None
        } else {
            Some(normalize_separators(Path::new(&value)))
        }
    })
}

/// Steam stores forward slashes in the registry even on Windows.
#[cfg_attr(not(windows), allow(unused))]
fn normalize_separators(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        PathBuf::from(text.replace('/', "\\"))
    } else {
        PathBuf::from(text.into_owned())
    }
}
