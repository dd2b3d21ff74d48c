//! Integration tests for the host USB vocabulary
//!
//! Covers device spec parsing and prefix matching, VM binding parsing and
//! serde round-trips through the string forms used in configuration files.
//!
//! Run with: `cargo test -p common --test usb_types_tests`

use common::test_utils::{binding, create_mock_host_device, spec};
use common::{BusPort, Error, TargetDeviceSpec, VmBinding};
use proptest::prelude::*;

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_vendor_only_spec_selects_whole_vendor() {
    let logitech = spec("046d:");
    let receiver = create_mock_host_device("1", "3", "046d:c52b");
    let webcam = create_mock_host_device("1", "4", "046d:085e");
    let other = create_mock_host_device("1", "5", "046e:c52b");

    assert!(logitech.matches(&receiver));
    assert!(logitech.matches(&webcam));
    assert!(!logitech.matches(&other));
}

#[test]
fn test_full_spec_requires_exact_product() {
    let full = spec("1a2b:3c4d");
    assert!(full.matches(&create_mock_host_device("2", "1.1", "1a2b:3c4d")));
    assert!(!full.matches(&create_mock_host_device("2", "1.1", "1a2b:3c4e")));
}

#[test]
fn test_invalid_spec_error_names_input() {
    let err = "ZZZZ:0001".parse::<TargetDeviceSpec>().unwrap_err();
    assert!(matches!(err, Error::InvalidDeviceSpec(ref s) if s == "ZZZZ:0001"));
    assert!(err.to_string().contains("ZZZZ:0001"));
}

// ============================================================================
// Serde string forms
// ============================================================================

#[test]
fn test_spec_deserializes_from_string() {
    let parsed: Vec<TargetDeviceSpec> = serde_json::from_str(r#"["1a2b:3c4d", "dead:"]"#).unwrap();
    assert_eq!(parsed, vec![spec("1a2b:3c4d"), spec("dead:")]);
}

#[test]
fn test_spec_deserialize_rejects_invalid() {
    assert!(serde_json::from_str::<TargetDeviceSpec>(r#""1a2b-3c4d""#).is_err());
}

#[test]
fn test_binding_serde_roundtrip_through_string() {
    let original = binding("101:3-1.2");
    let encoded = serde_json::to_string(&original).unwrap();
    assert_eq!(encoded, r#""101:3-1.2""#);
    let decoded: VmBinding = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_binding_requires_position() {
    assert!(matches!(
        "100:usb1".parse::<VmBinding>(),
        Err(Error::InvalidBinding(_))
    ));
}

#[test]
fn test_bus_port_from_str() {
    let pos: BusPort = "5-2.1.1".parse().unwrap();
    assert_eq!(pos.to_string(), "5-2.1.1");
    assert!(matches!(
        "5:2".parse::<BusPort>(),
        Err(Error::InvalidPosition(_))
    ));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_full_spec_matches_own_device(vid in "[0-9a-f]{4}", pid in "[0-9a-f]{4}") {
        let id = format!("{}:{}", vid, pid);
        let parsed: TargetDeviceSpec = id.parse().unwrap();
        prop_assert!(parsed.matches(&create_mock_host_device("1", "1", &id)));
    }

    #[test]
    fn prop_vendor_spec_ignores_product(vid in "[0-9a-f]{4}", pid in "[0-9a-f]{4}") {
        let parsed: TargetDeviceSpec = format!("{}:", vid).parse().unwrap();
        let device = create_mock_host_device("1", "1", &format!("{}:{}", vid, pid));
        prop_assert!(parsed.matches(&device));
    }

    #[test]
    fn prop_uppercase_is_rejected(vid in "[0-9A-F]{3}[A-F]") {
        let input = format!("{}:", vid);
        prop_assert!(input.parse::<TargetDeviceSpec>().is_err());
    }
}
