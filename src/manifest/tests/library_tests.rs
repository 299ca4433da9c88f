use super::*;
use tempfile::TempDir;

fn write_manifest(library: &Path, file_name: &str, body: &str) {
    let dir = library.join("steamapps");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file_name), body).unwrap();
}

fn app_manifest(app_id: &str, name: &str) -> String {
    format!(
        r#""AppState"
{{
    "appid"        "{app_id}"
    "name"         "{name}"
    "installdir"   "{name}"
    "LastPlayed"   "1700000000"
    "SizeOnDisk"   "1048576"
}}"#
    )
}

#[test]
fn test_library_roots_modern_layout() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("Steam");
    let extra = temp.path().join("Games");
    std::fs::create_dir_all(root.join("steamapps")).unwrap();
    std::fs::write(
        root.join("steamapps/libraryfolders.vdf"),
        format!(
            r#""libraryfolders"
{{
    "contentstatsid"  "123"
    "0" {{ "path" "{root}" }}
    "1" {{ "path" "{extra}" "label" "" }}
}}"#,
            root = root.display(),
            extra = extra.display()
        ),
    )
    .unwrap();

    let roots = list_library_roots(&root);
    assert_eq!(roots, vec![root.clone(), extra]);
}

#[test]
fn test_library_roots_legacy_layout() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("Steam");
    std::fs::create_dir_all(root.join("steamapps")).unwrap();
    std::fs::write(
        root.join("steamapps/libraryfolders.vdf"),
        r#""LibraryFolders" { "TimeNextStatsReport" "1" "1" "/mnt/games" "2" "/mnt/games/" }"#,
    )
    .unwrap();

    let roots = list_library_roots(&root);
    assert_eq!(roots, vec![root.clone(), PathBuf::from("/mnt/games")]);
}

#[test]
fn test_library_roots_without_folders_file() {
    let temp = TempDir::new().unwrap();
    let roots = list_library_roots(temp.path());
    assert_eq!(roots, vec![temp.path().to_path_buf()]);
}

#[test]
fn test_installed_entries_skip_manifest_without_id() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_manifest(root, "appmanifest_440.acf", &app_manifest("440", "Team Fortress 2"));
    write_manifest(
        root,
        "appmanifest_999.acf",
        r#""AppState" { "name" "Broken Manifest" }"#,
    );

    let entries = list_installed_entries(root);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].app_id, 440);
    assert_eq!(entries[0].name, "Team Fortress 2");
    assert_eq!(entries[0].last_played, 1_700_000_000);
    assert_eq!(entries[0].size_on_disk, 1_048_576);
    assert_eq!(entries[0].library_root, root.to_path_buf());
}

#[test]
fn test_installed_entries_skip_zero_id_and_garbage() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_manifest(root, "appmanifest_0.acf", &app_manifest("0", "Zero"));
    write_manifest(root, "appmanifest_1.acf", "}}}{{ not a manifest");
    write_manifest(root, "appmanifest_2.acf", &app_manifest("abc", "NaN"));

    assert!(list_installed_entries(root).is_empty());
}

#[test]
fn test_installed_entries_ignore_other_files() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_manifest(root, "appmanifest_10.acf.bak", &app_manifest("10", "Backup"));
    write_manifest(root, "libraryfolders.vdf", "\"libraryfolders\" {}");
    write_manifest(root, "appmanifest_20.acf", &app_manifest("20", "Real"));

    let ids: Vec<u32> = list_installed_entries(root).iter().map(|e| e.app_id).collect();
    assert_eq!(ids, vec![20]);
}

#[test]
fn test_installed_entries_sorted_by_name_across_libraries() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("Steam");
    let extra = temp.path().join("Extra");
    write_manifest(&root, "appmanifest_1.acf", &app_manifest("1", "zeta"));
    write_manifest(&extra, "appmanifest_2.acf", &app_manifest("2", "Alpha"));
    std::fs::write(
        root.join("steamapps/libraryfolders.vdf"),
        format!(r#""libraryfolders" {{ "1" {{ "path" "{}" }} }}"#, extra.display()),
    )
    .unwrap();

    let entries = list_installed_entries(&root);
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "zeta"]);
    assert_eq!(entries[0].library_root, extra);
}

#[test]
fn test_entry_defaults_for_missing_fields() {
    let doc = keyvalue::parse(r#""AppState" { "appid" "730" }"#);
    let state = doc.get_map("AppState").unwrap();
    let entry = entry_from_app_state(state, Path::new("/lib")).unwrap();
    assert_eq!(entry.name, "");
    assert_eq!(entry.install_dir, "");
    assert_eq!(entry.last_played, 0);
    assert_eq!(entry.size_on_disk, 0);
}
