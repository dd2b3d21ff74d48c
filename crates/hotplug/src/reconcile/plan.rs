//! Pure planning: what to detach and what to attach
//!
//! Nothing here talks to a VM. The planners take immutable attachment
//! snapshots and the host inventory and decide, step by step, which
//! operation the engine should issue and which it should skip.

use crate::vm::AttachmentSnapshot;
use common::{HostDevice, TargetDeviceSpec};
use std::collections::HashSet;
use std::fmt;

const SLOT_PREFIX: &str = "auto_";

/// Deterministic identifier for the device requested at a spec position
///
/// The same spec ordering always yields the same names, which is what lets
/// a run recognise what a previous run attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotName(String);

impl SlotName {
    pub fn for_index(index: usize) -> Self {
        Self(format!("{}{}", SLOT_PREFIX, index))
    }

    /// Slot names for `count` specs
    pub fn all(count: usize) -> impl Iterator<Item = SlotName> {
        (0..count).map(Self::for_index)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Attach,
    Detach,
}

/// One unit of work against one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPlanEntry {
    pub operation: Operation,
    pub vm_id: String,
    pub slot: SlotName,
    /// Host device involved, when it is known to the host inventory
    pub device: Option<HostDevice>,
}

impl AttachmentPlanEntry {
    /// Device identity for log lines
    pub fn device_label(&self) -> String {
        match &self.device {
            Some(device) => device.to_string(),
            None => "unknown device".to_string(),
        }
    }
}

/// Why a planned step needs no command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Slot is on the target VM already and stays there
    KeptOnTarget,
    /// Slot is attached on the target VM, nothing to add
    AlreadyAttached,
    /// Device is selected but every slot that selects it is taken
    NoFreeSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Issue,
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub entry: AttachmentPlanEntry,
    pub action: StepAction,
}

/// Whether `device` is selected for the slot of `spec`
///
/// Direct mode: `device` matches `spec` by prefix. Reverse mode: `device`
/// matches none of `all_specs`.
pub fn is_selected(
    spec: &TargetDeviceSpec,
    all_specs: &[TargetDeviceSpec],
    device: &HostDevice,
    reverse_match: bool,
) -> bool {
    if reverse_match {
        !all_specs.iter().any(|s| s.matches(device))
    } else {
        spec.matches(device)
    }
}

fn find_in_inventory(inventory: &[HostDevice], bus_and_port: &str) -> Option<HostDevice> {
    inventory
        .iter()
        .find(|d| d.bus_and_port() == bus_and_port)
        .cloned()
}

/// Plan the detach phase
///
/// For every snapshot in order and every slot in order: a slot present on
/// the target VM is kept, a slot present anywhere else is detached. Slots
/// a VM does not have produce no step.
pub fn plan_detaches(
    slot_count: usize,
    snapshots: &[AttachmentSnapshot],
    target_vm_id: &str,
    inventory: &[HostDevice],
) -> Vec<PlannedStep> {
    let mut steps = Vec::new();
    for snapshot in snapshots {
        let is_target = snapshot.vm_id() == target_vm_id;
        for slot in SlotName::all(slot_count) {
            let Some(attached) = snapshot.get(slot.as_str()) else {
                continue;
            };
            let action = if is_target {
                StepAction::Skip(SkipReason::KeptOnTarget)
            } else {
                StepAction::Issue
            };
            steps.push(PlannedStep {
                entry: AttachmentPlanEntry {
                    operation: Operation::Detach,
                    vm_id: snapshot.vm_id().to_string(),
                    slot,
                    device: find_in_inventory(inventory, &attached.bus_and_port),
                },
                action,
            });
        }
    }
    steps
}

/// Plan the attach phase against a fresh snapshot of the target VM
///
/// Each slot gets at most one device: the first in inventory order that is
/// selected and not yet claimed. A device counts as claimed once a slot
/// takes it or when the target already holds it, so no host device is
/// planned twice in one run. A slot the target already has is skipped.
///
/// Selected devices left without a slot are planned last as
/// [`SkipReason::NoFreeSlot`] under the first slot that selects them.
pub fn plan_attaches(
    specs: &[TargetDeviceSpec],
    target: &AttachmentSnapshot,
    inventory: &[HostDevice],
    reverse_match: bool,
) -> Vec<PlannedStep> {
    let mut claimed: HashSet<String> = target.iter().map(|d| d.bus_and_port.clone()).collect();
    let mut steps = Vec::new();

    for (index, spec) in specs.iter().enumerate() {
        let slot = SlotName::for_index(index);

        if let Some(attached) = target.get(slot.as_str()) {
            steps.push(PlannedStep {
                entry: AttachmentPlanEntry {
                    operation: Operation::Attach,
                    vm_id: target.vm_id().to_string(),
                    slot,
                    device: find_in_inventory(inventory, &attached.bus_and_port),
                },
                action: StepAction::Skip(SkipReason::AlreadyAttached),
            });
            continue;
        }

        let candidate = inventory.iter().find(|device| {
            is_selected(spec, specs, device, reverse_match)
                && !claimed.contains(&device.bus_and_port())
        });
        if let Some(device) = candidate {
            claimed.insert(device.bus_and_port());
            steps.push(PlannedStep {
                entry: AttachmentPlanEntry {
                    operation: Operation::Attach,
                    vm_id: target.vm_id().to_string(),
                    slot,
                    device: Some(device.clone()),
                },
                action: StepAction::Issue,
            });
        }
    }

    for device in inventory {
        if claimed.contains(&device.bus_and_port()) {
            continue;
        }
        let Some(index) = specs
            .iter()
            .position(|spec| is_selected(spec, specs, device, reverse_match))
        else {
            continue;
        };
        steps.push(PlannedStep {
            entry: AttachmentPlanEntry {
                operation: Operation::Attach,
                vm_id: target.vm_id().to_string(),
                slot: SlotName::for_index(index),
                device: Some(device.clone()),
            },
            action: StepAction::Skip(SkipReason::NoFreeSlot),
        });
    }
    steps
}
