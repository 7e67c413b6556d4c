//! Configuration file loading tests
//!
//! Exercises parsing, defaults, validation and save/load through real files.

use monitor::MonitorConfig;
use monitor::config::load_config;
use std::fs;
use tempfile::TempDir;
use transport::{DeviceIdentifier, OverflowPolicy, TransportSettings};

// ============================================================================
// Parsing
// ============================================================================

const FULL_CONFIG: &str = r#"
[device]
vendor_id = 0x135e
product_id = 0x0026

[transport]
read_timeout_ms = 50
write_timeout_ms = 250
join_timeout_ms = 2000

[transport.queue]
capacity = 128
overflow = "drop_oldest"

[logging]
level = "debug"
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("monitor.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = MonitorConfig::load(Some(path)).unwrap();
    assert_eq!(
        config.device.identifier(),
        DeviceIdentifier::new(0x135e, 0x0026)
    );
    assert_eq!(config.transport.read_timeout_ms, 50);
    assert_eq!(config.transport.write_timeout_ms, 250);
    assert_eq!(config.transport.join_timeout_ms, 2000);
    assert_eq!(config.transport.queue.capacity, Some(128));
    assert_eq!(config.transport.queue.overflow, OverflowPolicy::DropOldest);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = MonitorConfig::load(Some(path)).unwrap();
    assert_eq!(config, MonitorConfig::default());
}

#[test]
fn test_partial_sections_fill_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[device]
product_id = 0x0121

[transport]
read_timeout_ms = 20
"#,
    );

    let config = MonitorConfig::load(Some(path)).unwrap();
    assert_eq!(config.device.vendor_id, 0x0e77);
    assert_eq!(config.device.product_id, 0x0121);
    assert_eq!(config.transport.read_timeout_ms, 20);
    assert_eq!(
        config.transport.write_timeout_ms,
        TransportSettings::default().write_timeout_ms
    );
    assert_eq!(config.transport.queue.capacity, None);
    assert_eq!(config.logging.level, "info");
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_invalid_log_level_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[logging]\nlevel = \"loud\"\n");

    let err = MonitorConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid log level"));
}

#[test]
fn test_zero_capacity_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[transport.queue]\ncapacity = 0\n");

    assert!(MonitorConfig::load(Some(path)).is_err());
}

#[test]
fn test_unknown_overflow_policy_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[transport.queue]\noverflow = \"spill\"\n");

    let err = MonitorConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_out_of_range_id_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[device]\nvendor_id = 0x10000\n");

    assert!(MonitorConfig::load(Some(path)).is_err());
}

#[test]
fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = MonitorConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}

// ============================================================================
// Save / load
// ============================================================================

#[test]
fn test_save_creates_parent_dirs_and_reloads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("knx-usb").join("monitor.toml");

    let mut config = MonitorConfig::default();
    config.device.vendor_id = 0x28c2;
    config.transport.queue.capacity = Some(64);
    config.transport.queue.overflow = OverflowPolicy::Block;
    config.save(&path).unwrap();

    let loaded = MonitorConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_config_accepts_plain_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_default_path_location() {
    let path = MonitorConfig::default_path();
    assert!(path.ends_with("knx-usb/monitor.toml"));
}
