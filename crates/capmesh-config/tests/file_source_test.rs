#![allow(clippy::unwrap_used)]
// Integration tests for `FileSettingsSource` behind the core settings store.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use capmesh_config::{EngineOptions, FileSettingsSource};
use capmesh_core::{CoreError, Platform, SKELETON, SettingsSource, SettingsStore};

fn store_in(dir: &std::path::Path) -> (SettingsStore, FileSettingsSource) {
    let source = FileSettingsSource::new(dir.join("settings"));
    let shared: Arc<dyn SettingsSource> = Arc::new(source.clone());
    (SettingsStore::new(shared, "home"), source)
}

#[test]
fn test_first_load_writes_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    let (store, source) = store_in(dir.path());

    let snapshot = store.load("home").unwrap();
    assert!(snapshot.is_loaded());
    assert!(snapshot.ignore_platforms().is_empty());

    let path = source.path_for("home").unwrap();
    assert_eq!(std::fs::read_to_string(path).unwrap(), SKELETON);
}

#[test]
fn test_edits_are_picked_up_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let (store, source) = store_in(dir.path());
    store.load("home").unwrap();

    std::fs::write(
        source.path_for("home").unwrap(),
        r"
globals:
  switch:
    - capability: switch
      attribute: switch
ignore_platforms: [vacuum]
",
    )
    .unwrap();

    let snapshot = store.load("home").unwrap();
    assert_eq!(snapshot.global_descriptors(Platform::Switch).len(), 1);
    assert!(snapshot.ignore_platforms().contains(&Platform::Vacuum));
    assert!(!snapshot.allow_platform(Platform::Vacuum));
}

#[test]
fn test_malformed_file_leaves_store_unset() {
    let dir = tempfile::tempdir().unwrap();
    let (store, source) = store_in(dir.path());
    source.create("home", "globals: [").unwrap();

    let err = store.load("home").unwrap_err();
    assert!(matches!(err, CoreError::ConfigParse { .. }));
    assert!(!store.is_loaded());
    assert!(store.snapshot().enabled_platforms().is_empty());
}

#[test]
fn test_options_point_at_source_dir() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        settings_dir: Some(dir.path().to_path_buf()),
        location: "cabin".into(),
        ..EngineOptions::default()
    };
    let source = options.settings_source();
    assert_eq!(source.dir(), dir.path());
    assert_eq!(
        source.path_for(&options.to_engine_config().location).unwrap(),
        dir.path().join("cabin.yaml")
    );
}
