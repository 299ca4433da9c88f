//! Persisted user settings.
//!
//! A single provider is built in `main` once paths are resolved, then shared
//! as `Arc<dyn SettingsProvider>` with everything that needs a setting.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Steam Web API key; the credential half of a session identity.
pub const API_KEY: &str = "apiKey";
/// Overrides Steam root discovery.
pub const STEAM_ROOT: &str = "steamRoot";
/// 64-bit id used for per-player lookups when the session cannot report one.
pub const STEAM_ID: &str = "steamId";

pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Settings stored as one flat JSON object on disk.
///
/// Reads go to the file every time so concurrent controllers see each other's
/// writes. Writes are serialized through an exclusive lock on a sibling
/// `.lock` file and land via temp file + rename.
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read settings file: {}", self.path.display())
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)
            .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!(
                "Settings file is not a JSON object: {}",
                self.path.display()
            ),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory: {}", parent.display())
            })?;
        }

        let lock_path = self.path.with_extension("json.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open settings lock: {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .context("Failed to lock settings file")?;

        let result = (|| -> Result<()> {
            let mut map = self.read_all()?;
            apply(&mut map);
            let content = serde_json::to_string_pretty(&Value::Object(map))?;

            let temp_path = self.path.with_extension("json.tmp");
            let mut temp = fs::File::create(&temp_path).with_context(|| {
                format!("Failed to create settings temp file: {}", temp_path.display())
            })?;
            temp.write_all(content.as_bytes())?;
            temp.sync_all()?;
            fs::rename(&temp_path, &self.path).with_context(|| {
                format!("Failed to replace settings file: {}", self.path.display())
            })?;
            Ok(())
        })();

        drop(lock_file);
        result
    }
}

impl SettingsProvider for FileSettings {
    fn get(&self, key: &str) -> Option<String> {
        let map = match self.read_all() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable settings file");
                return None;
            }
        };
        match map.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

/// In-memory settings for tests and one-off runs.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(entries: &[(&str, &str)]) -> Self {
        let values = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(values),
        }
    }
}

impl SettingsProvider for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
