//! ---
//! eb_section: "04-configuration-orchestration"
//! eb_subsection: "test"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Engine configuration loading from disk."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use r_eb_common::config::EngineConfig;
use tempfile::tempdir;

#[test]
fn first_existing_candidate_is_loaded() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("engine.toml");
    fs::write(&present, "shutdown_grace = 1500\n[defaults]\nthreads = 3\n").unwrap();

    let loaded = EngineConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source.as_deref(), Some(present.as_path()));
    assert_eq!(loaded.config.defaults.threads, 3);
    assert_eq!(loaded.config.shutdown_grace, Duration::from_millis(1500));
}

#[test]
fn defaults_are_used_when_nothing_exists() {
    let dir = tempdir().expect("tempdir");
    let loaded = EngineConfig::load_with_source(&[dir.path().join("nope.toml")]).unwrap();
    assert!(loaded.source.is_none());
    assert_eq!(loaded.config.defaults.threads, 1);
}

#[test]
fn invalid_file_reports_its_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "shutdown_grace = \"soon\"").unwrap();
    let err = EngineConfig::from_path(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.toml"));
}

#[test]
fn shipped_example_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/r-eb.example.toml");
    let config = EngineConfig::from_path(&path).expect("example config loads");
    assert_eq!(config.metrics.listen.port(), 9797);
    assert_eq!(config.defaults.burst_ratio, 1.1);
}
