use super::ManifestEntry;
use crate::keyvalue::{self, KeyValueMap};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

fn manifest_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^appmanifest_(\d+)\.acf$").expect("manifest name pattern is valid")
    })
}

/// Returns the primary root followed by every extra library declared in
/// `steamapps/libraryfolders.vdf`, in discovery order and without duplicates.
///
/// Both the current (`"libraryfolders" { "0" { "path" ... } }`) and the legacy
/// (`"LibraryFolders" { "1" "D:\\Games" }`) layouts are accepted.
pub fn list_library_roots(root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![root.to_path_buf()];

    let candidates = [
        root.join("steamapps").join("libraryfolders.vdf"),
        root.join("config").join("libraryfolders.vdf"),
    ];
    for path in candidates {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let doc = keyvalue::parse(&content);
        let Some(folders) = doc
            .get_any(&["libraryfolders", "LibraryFolders"])
            .and_then(|node| node.as_map())
        else {
            continue;
        };

        for (key, node) in folders.iter() {
            // Numeric keys are libraries; others ("contentstatsid", ...) are metadata.
            if key.parse::<u32>().is_err() {
                continue;
            }
            let path = match node.as_map() {
                Some(entry) => entry.get_str("path"),
                None => node.as_str(),
            };
            if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
                push_unique(&mut roots, PathBuf::from(path));
            }
        }
    }

    roots
}

fn push_unique(roots: &mut Vec<PathBuf>, candidate: PathBuf) {
    let key = comparable(&candidate);
    if !roots.iter().any(|existing| comparable(existing) == key) {
        roots.push(candidate);
    }
}

/// Comparison key that ignores trailing separators and, on Windows, case.
fn comparable(path: &Path) -> String {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches(['/', '\\']);
    if cfg!(windows) {
        trimmed.replace('/', "\\").to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Scans every library for app manifests and returns the usable ones sorted
/// by name. A manifest that cannot be read or lacks a non-zero app id is
/// skipped; it never aborts the scan.
pub fn list_installed_entries(root: &Path) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();

    for library in list_library_roots(root) {
        let steamapps = library.join("steamapps");
        let Ok(dir) = std::fs::read_dir(&steamapps) else {
            debug!(library = %library.display(), "library has no readable steamapps directory");
            continue;
        };

        for item in dir.flatten() {
            let file_name = item.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !manifest_name_pattern().is_match(file_name) {
                continue;
            }
            let path = item.path();
            match read_manifest(&path, &library) {
                Some(entry) => entries.push(entry),
                None => debug!(manifest = %path.display(), "skipping unusable manifest"),
            }
        }
    }

    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then(a.app_id.cmp(&b.app_id))
    });
    entries
}

fn read_manifest(path: &Path, library: &Path) -> Option<ManifestEntry> {
    let content = std::fs::read_to_string(path).ok()?;
    let doc = keyvalue::parse(&content);
    let state = doc.get_any(&["AppState", "appstate"])?.as_map()?;
    entry_from_app_state(state, library)
}

pub(crate) fn entry_from_app_state(state: &KeyValueMap, library: &Path) -> Option<ManifestEntry> {
    let app_id = state
        .get_u64("appid")
        .or_else(|| state.get_u64("appID"))
        .and_then(|id| u32::try_from(id).ok())
        .filter(|id| *id != 0)?;

    Some(ManifestEntry {
        app_id,
        name: state.get_str("name").unwrap_or_default().to_string(),
        install_dir: state.get_str("installdir").unwrap_or_default().to_string(),
        last_played: state.get_u64("LastPlayed").unwrap_or(0),
        size_on_disk: state.get_u64("SizeOnDisk").unwrap_or(0),
        library_root: library.to_path_buf(),
    })
}

#[cfg(test)]
#[path = "tests/library_tests.rs"]
mod tests;
