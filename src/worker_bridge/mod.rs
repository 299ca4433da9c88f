//! Controller side of the bridge: spawning, supervising and talking to
//! worker processes.
//!
//! - **`channel`**: id-correlated JSON lines over a worker's stdio.
//! - **`launcher`**: how a worker process is started.
//! - **`process`**: one running worker and its exit watcher.
//! - **`bridge`**: the single active worker for interactive requests.
//! - **`idle`**: any number of background workers, one per app.

pub mod bridge;
pub mod channel;
pub mod idle;
pub mod launcher;
pub mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{SessionIdentity, WorkerBridge};
pub use idle::{IdleSession, IdleSupervisor};
pub use launcher::{ProcessLauncher, WorkerLauncher, WORKER_FLAG};
pub use process::{ProcessState, WorkerProcess};
