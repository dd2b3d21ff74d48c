//! Detect-and-move trigger
//!
//! Each VM is bound to the physical position where its own input device
//! (typically a KVM switch output) appears when that VM is active. Finding
//! the detect device on the host therefore tells which VM the operator is
//! looking at.

use crate::error::{HotplugError, Result};
use common::{HostDevice, TargetDeviceSpec, VmBinding};
use tracing::{debug, info};

/// Distinct VM ids named by `bindings`, in first-seen order
pub fn bound_vm_ids(bindings: &[VmBinding]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for binding in bindings {
        if !ids.contains(&binding.vm_id) {
            ids.push(binding.vm_id.clone());
        }
    }
    ids
}

/// Find the VM the devices should move to
///
/// Every host device matching `detect` is looked up, in scan order, against
/// `bindings` by position; the first one bound to a VM for which `is_live`
/// holds wins.
///
/// Fails with [`HotplugError::DetectDeviceNotFound`] when no device matches,
/// and with [`HotplugError::NoTargetConnection`] when matches exist but none
/// is bound to a live VM.
pub fn locate_target(
    detect: &TargetDeviceSpec,
    bindings: &[VmBinding],
    inventory: &[HostDevice],
    is_live: impl Fn(&str) -> bool,
) -> Result<String> {
    let detected: Vec<&HostDevice> = inventory.iter().filter(|d| detect.matches(d)).collect();
    if detected.is_empty() {
        return Err(HotplugError::DetectDeviceNotFound(detect.to_string()));
    }

    let mut seen = Vec::new();
    for device in detected {
        let position = device.position();
        match bindings.iter().find(|b| b.position == position) {
            Some(binding) if is_live(&binding.vm_id) => {
                info!("Detect device {} selects VM {}", device, binding.vm_id);
                return Ok(binding.vm_id.clone());
            }
            Some(binding) => {
                debug!("Detect device {} is bound to VM {}, which is not connected", device, binding.vm_id);
                seen.push(format!("{} (VM {} not connected)", position, binding.vm_id));
            }
            None => {
                debug!("Detect device {} is not at any bound position", device);
                seen.push(format!("{} (no binding)", position));
            }
        }
    }

    Err(HotplugError::NoTargetConnection(format!(
        "detect device {} found at {}",
        detect,
        seen.join(", ")
    )))
}
