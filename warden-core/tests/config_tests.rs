//! Config loading, validation error messages and registry parsing.

use std::time::Duration;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use warden_core::{config, ConfigError, ServiceId, CONFIG_FILE_NAME};

const REGISTRY_YAML: &str = r#"
sync:
  remote: upstream
  push_interval: 30
  retry_delay: 250ms
supervisor:
  port_floor: 7100
  restart_delay: 1s
services:
  - id: pss
    display_name: PSS
    port: 4001
    start_command: npm run dev
  - id: wallet
    port: 5001
    start_command: npm start
    dependencies: [pss]
  - id: gosellr
    port: 4004
    start_command: npm start
    auto_start: false
    dependencies: [pss, wallet]
    max_restarts: 2
"#;

// ---------------------------------------------------------------------------
// 1. Happy path
// ---------------------------------------------------------------------------

#[test]
fn registry_loads_in_declared_order() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child(CONFIG_FILE_NAME)
        .write_str(REGISTRY_YAML)
        .expect("write config");
    root.child(CONFIG_FILE_NAME).assert(predicate::path::exists());

    let cfg = config::load_at(root.path()).expect("load");
    let ids: Vec<&str> = cfg.services.iter().map(|s| s.id.0.as_str()).collect();
    assert_eq!(ids, vec!["pss", "wallet", "gosellr"]);

    assert_eq!(cfg.sync.remote, "upstream");
    assert_eq!(cfg.sync.push_interval, Duration::from_secs(30));
    assert_eq!(cfg.sync.retry_delay, Duration::from_millis(250));
    assert_eq!(cfg.supervisor.port_floor, 7100);

    let wallet = &cfg.services[1];
    assert_eq!(wallet.dependencies, vec![ServiceId::from("pss")]);
    assert!(wallet.auto_start);
    assert_eq!(cfg.max_restarts_for(&cfg.services[2]), 2);
    assert!(!cfg.services[2].auto_start);
}

#[test]
fn empty_file_is_all_defaults() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child(CONFIG_FILE_NAME).write_str("\n").expect("write");
    let cfg = config::load_at(root.path()).expect("load");
    assert!(cfg.services.is_empty());
    assert_eq!(cfg.sync.remote, "origin");
}

// ---------------------------------------------------------------------------
// 2. Errors
// ---------------------------------------------------------------------------

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child(CONFIG_FILE_NAME)
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(root.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}

#[rstest]
#[case::duplicate_id(
    "services:\n  - {id: a, start_command: x}\n  - {id: a, start_command: y}\n",
    "duplicate service id 'a'"
)]
#[case::empty_command("services:\n  - {id: a, start_command: '  '}\n", "empty start_command")]
#[case::zero_interval("sync:\n  push_interval: 0s\n", "sync.push_interval")]
#[case::bad_glob("watch:\n  exclude: ['[unclosed']\n", "invalid glob pattern")]
#[case::bad_duration("sync:\n  pull_interval: whenever\n", "invalid duration")]
fn invalid_configs_are_rejected(#[case] yaml: &str, #[case] expected: &str) {
    let root = assert_fs::TempDir::new().expect("tempdir");
    root.child(CONFIG_FILE_NAME).write_str(yaml).expect("write");

    let err = config::load_at(root.path()).unwrap_err();
    assert!(
        err.to_string().contains(expected),
        "expected '{expected}' in: {err}"
    );
}
