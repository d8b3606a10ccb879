//! Configuration file loading

use rra_common::config::Settings;
use rra_common::Error;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_full_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("archiver.toml");
    fs::write(
        &path,
        r#"
interval = 300
sources = ["rust", "r/golang"]
do_archive_today = false
delay_wayback = 2.5
verify_max_checks = 4
out_json = "status.json"

[dashboard]
enabled = true
port = 9090

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.interval, 300);
    assert!(!settings.do_archive_today);
    assert_eq!(settings.delay_wayback, 2.5);
    assert_eq!(settings.verify_max_checks, 4);
    assert_eq!(settings.out_json.as_deref(), Some("status.json"));
    assert!(settings.dashboard.enabled);
    assert_eq!(settings.dashboard.port, 9090);
    assert_eq!(settings.dashboard.host, "127.0.0.1");
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.resolve_sources(&[]).unwrap(), vec!["rust", "golang"]);
}

#[test]
fn test_missing_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let err = Settings::load(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("--use-defaults"));

    let err = Settings::load_or_defaults(&path, false).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_missing_file_with_explicit_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings::load_or_defaults(&temp_dir.path().join("absent.toml"), true).unwrap();

    assert_eq!(settings, Settings::default());
    assert!(settings.sources.is_empty(), "defaults never invent a monitored source");
}

#[test]
fn test_invalid_file_not_masked_by_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("archiver.toml");
    fs::write(&path, "interval = \"often\"\n").unwrap();

    let err = Settings::load_or_defaults(&path, true).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("archiver.toml"), "{}", err);
}
