//! Integration tests for configuration parsing
//!
//! Covers a full configuration file, partial files falling back to
//! defaults, save/load through the filesystem, and rejected input.

use hotplug::config::HotplugConfig;
use std::path::PathBuf;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"

[qmp]
socket_dir = "/run/qemu"
connect_timeout = "3s"
command_timeout = "1m"
machine_bus_path = "/machine/i440fx/pci.0"

[reconcile]
detach_settle = "500ms"
attach_settle = "2s"
reverse_match = true

[detect]
device = "046d:c52b"
bindings = ["100:5-2.1.1", "101:5-2.1.2"]
targets = ["1a2b:3c4d", "046d:"]
"#;

#[test]
fn test_full_config() {
    let config = HotplugConfig::from_toml(FULL_CONFIG).unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.qmp.socket_path("100"), PathBuf::from("/run/qemu/100.qmp"));
    assert_eq!(config.qmp.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.qmp.command_timeout, Duration::from_secs(60));
    assert_eq!(config.qmp.machine_bus_path, "/machine/i440fx/pci.0");

    let options = config.reconcile.to_options();
    assert!(options.reverse_match);
    assert_eq!(options.detach_settle, Duration::from_millis(500));
    assert_eq!(options.attach_settle, Duration::from_secs(2));

    assert_eq!(config.detect.device.unwrap().as_str(), "046d:c52b");
    assert_eq!(config.detect.bindings.len(), 2);
    assert_eq!(config.detect.bindings[1].vm_id, "101");
    assert_eq!(config.detect.bindings[1].position.port_path, "2.1.2");
    assert!(config.detect.targets[1].is_vendor_only());
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = HotplugConfig::from_toml("[reconcile]\nreverse_match = true\n").unwrap();
    let defaults = HotplugConfig::default();

    assert!(config.reconcile.reverse_match);
    assert_eq!(config.reconcile.attach_settle, defaults.reconcile.attach_settle);
    assert_eq!(config.qmp, defaults.qmp);
    assert_eq!(config.general, defaults.general);
}

#[test]
fn test_empty_config_is_default() {
    assert_eq!(HotplugConfig::from_toml("").unwrap(), HotplugConfig::default());
}

#[test]
fn test_save_and_load_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("config.toml");

    let mut config = HotplugConfig::from_toml(FULL_CONFIG).unwrap();
    config.reconcile.attach_settle = Duration::from_millis(1500);
    config.save(&path).unwrap();

    let loaded = HotplugConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file_fails() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(HotplugConfig::load(Some(tmp.path().join("absent.toml"))).is_err());
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[general]\nlog_level = \"loud\"\n",
        "[qmp]\ncommand_timeout = \"0s\"\n",
        "[qmp]\nconnect_timeout = \"soon\"\n",
        "[qmp]\nmachine_bus_path = \"machine\"\n",
        "[detect]\ndevice = \"046D:C52B\"\n",
        "[detect]\nbindings = [\"100\"]\n",
        "[detect]\ntargets = [\"1a2b:3c\"]\n",
    ];
    for case in cases {
        assert!(HotplugConfig::from_toml(case).is_err(), "accepted: {}", case);
    }
}
