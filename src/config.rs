//! Tuning for the worker bridge and its session workers.
//!
//! Loaded from YAML. Every field has a default, so an absent or partial file
//! is valid and yields the values the bridge was tuned with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeTimings,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Controller-side timings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BridgeTimings {
    /// Ceiling for a worker to answer INIT. Default: 25s
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    /// Wait for natural exit before a forced kill. Default: 3s
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Pause between killing a worker and re-ensuring after the
    /// stats-not-received sentinel. Default: 800ms
    #[serde(default = "default_respawn_settle_ms")]
    pub respawn_settle_ms: u64,
}

impl Default for BridgeTimings {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            respawn_settle_ms: default_respawn_settle_ms(),
        }
    }
}

impl BridgeTimings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn respawn_settle(&self) -> Duration {
        Duration::from_millis(self.respawn_settle_ms)
    }
}

fn default_init_timeout_ms() -> u64 {
    25_000
}

fn default_kill_grace_ms() -> u64 {
    3_000
}

fn default_respawn_settle_ms() -> u64 {
    800
}

/// Worker-side state machine tuning.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Interval of the background callback pump once ready. Default: 250ms
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
    #[serde(default)]
    pub write: WriteConfig,
    /// Probes of the first schema entry before a bulk write gives up
    /// waiting. Default: 20
    #[serde(default = "default_set_all_gate_attempts")]
    pub set_all_gate_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessConfig::default(),
            pump_interval_ms: default_pump_interval_ms(),
            write: WriteConfig::default(),
            set_all_gate_attempts: default_set_all_gate_attempts(),
        }
    }
}

impl WorkerConfig {
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}

fn default_pump_interval_ms() -> u64 {
    250
}

fn default_set_all_gate_attempts() -> u32 {
    20
}

/// Readiness detection after a session opens.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReadinessConfig {
    /// Default: 150ms
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Hard ceiling on the probe loop. Default: 6s
    #[serde(default = "default_probe_ceiling_ms")]
    pub ceiling_ms: u64,
    /// Consecutive identical probe results needed. Default: 3
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            ceiling_ms: default_probe_ceiling_ms(),
            stability_threshold: default_stability_threshold(),
        }
    }
}

impl ReadinessConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

fn default_probe_interval_ms() -> u64 {
    150
}

fn default_probe_ceiling_ms() -> u64 {
    6_000
}

fn default_stability_threshold() -> u32 {
    3
}

/// Single-achievement write policy. These numbers were tuned empirically
/// against the native client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WriteConfig {
    /// Default: 20
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consecutive failures from the first attempt that trigger the
    /// stats-not-received sentinel. Default: 4
    #[serde(default = "default_fast_fail_after")]
    pub fast_fail_after: u32,
    /// Default: 250ms
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Time the native layer gets to commit a stored change. Default: 600ms
    #[serde(default = "default_flush_window_ms")]
    pub flush_window_ms: u64,
    /// Default: 50ms
    #[serde(default = "default_flush_poll_ms")]
    pub flush_poll_ms: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fast_fail_after: default_fast_fail_after(),
            retry_delay_ms: default_retry_delay_ms(),
            flush_window_ms: default_flush_window_ms(),
            flush_poll_ms: default_flush_poll_ms(),
        }
    }
}

impl WriteConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_millis(self.flush_window_ms)
    }

    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms)
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_fast_fail_after() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_flush_window_ms() -> u64 {
    600
}

fn default_flush_poll_ms() -> u64 {
    50
}

/// Outbound Steam Web API settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    /// Default: 15s
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_catalog_base_url() -> String {
    "https://api.steampowered.com".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a map.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(content).context("Failed to parse config as YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let readiness = &self.worker.readiness;
        if readiness.probe_interval_ms == 0 {
            anyhow::bail!("worker.readiness.probe_interval_ms must be greater than 0");
        }
        if readiness.stability_threshold == 0 {
            anyhow::bail!("worker.readiness.stability_threshold must be at least 1");
        }
        if self.worker.pump_interval_ms == 0 {
            anyhow::bail!("worker.pump_interval_ms must be greater than 0");
        }

        let write = &self.worker.write;
        if write.max_attempts == 0 {
            anyhow::bail!("worker.write.max_attempts must be at least 1");
        }
        if write.fast_fail_after > write.max_attempts {
            anyhow::bail!(
                "worker.write.fast_fail_after ({}) cannot exceed max_attempts ({})",
                write.fast_fail_after,
                write.max_attempts
            );
        }
        if write.flush_poll_ms == 0 {
            anyhow::bail!("worker.write.flush_poll_ms must be greater than 0");
        }
        if self.worker.set_all_gate_attempts == 0 {
            anyhow::bail!("worker.set_all_gate_attempts must be at least 1");
        }
        if self.bridge.init_timeout_ms == 0 {
            anyhow::bail!("bridge.init_timeout_ms must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
