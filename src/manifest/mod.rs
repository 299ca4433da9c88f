//! Read-only views over a local Steam installation.
//!
//! Everything here is a pure transformation over files owned by the Steam
//! client. Nothing is cached: each call re-reads the manifests it needs.
//!
//! - **Root discovery (`root.rs`)**: registry lookup on Windows, fixed
//!   candidate directories elsewhere.
//! - **Libraries (`library.rs`)**: library folders and `appmanifest_*.acf`.
//! - **Users (`users.rs`)**: accounts from `config/loginusers.vdf`.

pub mod library;
pub mod root;
pub mod users;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use library::{list_installed_entries, list_library_roots};
pub use root::{find_session_root, find_session_root_in};
pub use users::list_logged_in_users;

/// One installed application, parsed from its `appmanifest_<id>.acf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub app_id: u32,
    pub name: String,
    pub install_dir: String,
    /// Unix seconds, `0` if never played.
    pub last_played: u64,
    pub size_on_disk: u64,
    pub library_root: PathBuf,
}

/// An account that has signed into the local Steam client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedInUser {
    pub id64: u64,
    /// Lower 32 bits of `id64`.
    pub account_id: u32,
    pub display_name: String,
    pub most_recent: bool,
}
