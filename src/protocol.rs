//! Controller/worker wire protocol.
//!
//! One JSON object per line on the worker's stdin (requests) and stdout
//! (responses). Requests carry an `id` next to a `type` tag; responses echo
//! the `id` with `ok` and either `data` or `error`.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Every request a worker understands. Field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkerRequest {
    Init {
        app_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        /// Fallback player id for per-player lookups.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steam_id: Option<u64>,
    },
    GetAchievements,
    SetAchievement {
        api_name: String,
        unlocked: bool,
        /// Give up with the stats-not-received sentinel once the first
        /// attempts all fail, instead of spending the whole budget.
        #[serde(default = "default_true")]
        fast_fail: bool,
    },
    SetAllAchievements {
        unlocked: bool,
    },
    GetStats,
    SetStat {
        api_name: String,
        value: StatValue,
    },
    ResetStats {
        #[serde(default = "default_true")]
        achievements_too: bool,
    },
    Exit,
    Idle,
}

fn default_true() -> bool {
    true
}

impl WorkerRequest {
    /// Wire name of the request type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Init { .. } => "INIT",
            WorkerRequest::GetAchievements => "GET_ACHIEVEMENTS",
            WorkerRequest::SetAchievement { .. } => "SET_ACHIEVEMENT",
            WorkerRequest::SetAllAchievements { .. } => "SET_ALL_ACHIEVEMENTS",
            WorkerRequest::GetStats => "GET_STATS",
            WorkerRequest::SetStat { .. } => "SET_STAT",
            WorkerRequest::ResetStats { .. } => "RESET_STATS",
            WorkerRequest::Exit => "EXIT",
            WorkerRequest::Idle => "IDLE",
        }
    }

    /// Serializes the request with `id` merged into the same object.
    pub fn to_line(&self, id: u64) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), Value::from(id));
        }
        serde_json::to_string(&value)
    }
}

/// Response line written by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(id: u64, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A stat value; integers and floats are distinct stat kinds natively.
///
/// Integers outside the 32-bit range are rejected rather than narrowed to a
/// float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i32),
    Float(f32),
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(v) => write!(f, "{}", v),
            StatValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl std::str::FromStr for StatValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<i32>()
                .map(StatValue::Int)
                .map_err(|_| format!("'{}' is out of range for an integer stat", s));
        }
        s.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(StatValue::Float)
            .ok_or_else(|| format!("'{}' is not a number", s))
    }
}

impl<'de> Deserialize<'de> for StatValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StatValueVisitor)
    }
}

struct StatValueVisitor;

impl Visitor<'_> for StatValueVisitor {
    type Value = StatValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32-bit integer or a finite float")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<StatValue, E> {
        i32::try_from(v)
            .map(StatValue::Int)
            .map_err(|_| E::custom(format!("{} is out of range for an integer stat", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<StatValue, E> {
        i32::try_from(v)
            .map(StatValue::Int)
            .map_err(|_| E::custom(format!("{} is out of range for an integer stat", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<StatValue, E> {
        let narrowed = v as f32;
        if narrowed.is_finite() {
            Ok(StatValue::Float(narrowed))
        } else {
            Err(E::custom(format!("{} is out of range for a float stat", v)))
        }
    }
}

/// The mutable unit the protocol reads and flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementFlag {
    pub api_name: String,
    pub unlocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// An achievement as returned by `GET_ACHIEVEMENTS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementView {
    #[serde(flatten)]
    pub flag: AchievementFlag,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_gray: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_percent: Option<f64>,
}

/// A stat as returned by `GET_STATS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatView {
    pub api_name: String,
    #[serde(default)]
    pub display_name: String,
    /// `None` when the session could not read the stat.
    pub value: Option<StatValue>,
}

/// Result of `SET_ACHIEVEMENT`: `verified` is the flag read back after the
/// flush window, `expected` the value that was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAchievementOutcome {
    pub verified: bool,
    pub expected: bool,
    pub attempts: u32,
}

impl SetAchievementOutcome {
    pub fn confirmed(&self) -> bool {
        self.verified == self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAllOutcome {
    pub total: usize,
    pub applied: usize,
    #[serde(default)]
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub stable: bool,
    pub probes: u32,
}

/// Success payload of `INIT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitInfo {
    pub app_id: u32,
    pub build_sha: String,
    pub readiness: ReadinessReport,
}

/// Build identifier embedded by `build.rs`.
pub const BUILD_SHA: &str = env!("SAB_BUILD_SHA");
