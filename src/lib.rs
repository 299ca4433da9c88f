//! Steam achievement bridge.
//!
//! A controller process talks to short-lived worker processes, each holding
//! one native stats session, over newline-delimited JSON on stdio.

pub mod bridge_paths;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod keyvalue;
pub mod logging;
pub mod manifest;
pub mod protocol;
pub mod session_client;
pub mod settings;
pub mod worker;
pub mod worker_bridge;
