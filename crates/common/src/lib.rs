//! Common types for usb-hotplug
//!
//! This crate provides the host-side vocabulary shared by the hotplug
//! engine and its tests: scanned host USB devices, validated target device
//! specs, VM-to-position bindings, error handling and logging setup.

pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{BusPort, HostDevice, TargetDeviceSpec, VmBinding, validate_vm_id};
