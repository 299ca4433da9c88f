use clap::{Parser, Subcommand};
use sab_core::protocol::StatValue;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sab")]
#[command(about = "Read and write Steam achievements through isolated session workers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file (default: ~/.achievement-bridge/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Steam installation root, overriding the setting and auto-discovery
    #[arg(long, global = true)]
    pub steam_root: Option<PathBuf>,

    /// Internal: run as a session worker (spawned by the bridge)
    #[arg(long, hide = true)]
    pub internal_session_worker: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List installed games
    Games,

    /// List accounts that signed into the local Steam client
    Users,

    /// Show achievements of a game
    Achievements { app_id: u32 },

    /// Unlock one achievement
    Unlock { app_id: u32, api_name: String },

    /// Lock (clear) one achievement
    Lock { app_id: u32, api_name: String },

    /// Unlock every achievement of a game
    UnlockAll { app_id: u32 },

    /// Lock every achievement of a game
    LockAll { app_id: u32 },

    /// Show stats of a game (needs an API key)
    Stats { app_id: u32 },

    /// Set one stat; integer and float stats are distinct
    SetStat {
        app_id: u32,
        api_name: String,
        #[arg(allow_hyphen_values = true)]
        value: StatValue,
    },

    /// Reset all stats of a game
    Reset {
        app_id: u32,
        /// Leave achievements untouched
        #[arg(long)]
        keep_achievements: bool,
    },

    /// Keep sessions open until Ctrl-C
    Idle {
        #[arg(required = true)]
        app_ids: Vec<u32>,
    },

    /// Read or change persisted settings (apiKey, steamRoot, steamId)
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
}
