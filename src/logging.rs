//! Tracing setup shared by the controller and worker modes.
//!
//! Both modes log to stderr: the controller keeps stdout for command output
//! and a worker's stdout is the protocol channel.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "SAB_LOG";

pub fn init_tracing(default_level: LevelFilter, worker: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    // The controller re-logs worker lines with its own timestamp.
    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(!worker)
        .with_target(!worker)
        .compact()
        .try_init();
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}
