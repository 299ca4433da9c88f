//! Error taxonomy shared by the controller and worker sides of the bridge.

use std::time::Duration;

/// Failure reason a worker reports when a write never succeeded because the
/// session's stats were never delivered. Matched by string on the wire.
pub const STATS_NOT_RECEIVED: &str = "stats not received";

/// Failure reason attached to calls that were pending when a worker died.
pub const PROCESS_EXITED: &str = "process exited unexpectedly";

/// Errors surfaced by the worker bridge, idle supervisor and manifest reader.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Steam installation or a required manifest is absent. Not retryable.
    #[error("{0} not found")]
    NotFound(String),

    /// INIT did not complete within its ceiling. The caller may retry.
    #[error("worker did not finish INIT within {0:?}")]
    Timeout(Duration),

    /// The worker process died with calls outstanding. Re-ensure to recover.
    #[error("{}", PROCESS_EXITED)]
    ProcessExited,

    /// No worker is bound, or it is being torn down.
    #[error("worker not running")]
    NotRunning,

    /// The worker gave up early on a write; a fresh process is the remedy.
    #[error("{}", STATS_NOT_RECEIVED)]
    StatsNotReady,

    /// A write exhausted every attempt without the fast-fail path triggering.
    #[error("write rejected after {attempts} attempts: {reason}")]
    WriteRejected { attempts: u32, reason: String },

    /// Any other failure reported by a worker, passed through verbatim.
    #[error("{0}")]
    Worker(String),

    /// The worker process could not be started.
    #[error("failed to launch worker: {0}")]
    Launch(String),

    /// Writing to the worker's input stream failed.
    #[error("worker channel error: {0}")]
    Channel(String),
}

impl BridgeError {
    /// Decodes the `error` field of a failed response envelope.
    pub fn from_worker_reason(reason: String) -> Self {
        if reason == STATS_NOT_RECEIVED {
            BridgeError::StatsNotReady
        } else {
            BridgeError::Worker(reason)
        }
    }

    /// Returns true if re-invoking the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_)
                | BridgeError::ProcessExited
                | BridgeError::NotRunning
                | BridgeError::StatsNotReady
        )
    }
}
