//! Reconciliation engine
//!
//! Drives the two phases against live VMs:
//!
//! 1. snapshot every live VM, then detach desired slots from every VM that
//!    is not the target
//! 2. snapshot the target again, then attach the selected devices into
//!    slots it does not have yet
//!
//! QEMU acknowledges `device_del` before the device model has finished
//! tearing the device down, and nothing in QMP signals completion. The
//! settle delays stand in for that signal: one after every detach, one
//! before every attach.

use super::plan::{self, AttachmentPlanEntry, PlannedStep, SkipReason, StepAction};
use crate::error::{HotplugError, Result};
use crate::vm::{AttachmentSnapshot, ControlChannel, Introspector, VmEndpoint, commands};
use common::{HostDevice, TargetDeviceSpec};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Select devices matching none of the specs instead of matching ones
    pub reverse_match: bool,
    /// Pause after each detach
    pub detach_settle: Duration,
    /// Pause before each attach
    pub attach_settle: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            reverse_match: false,
            detach_settle: Duration::from_secs(1),
            attach_settle: Duration::from_secs(5),
        }
    }
}

/// Terminal state of one plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Detached,
    /// The VM no longer had the slot when the detach arrived
    AlreadyAbsent,
    /// Slot stays on the target VM
    Kept,
    Attached,
    AlreadyAttached,
    /// Selected, but no slot was left for it
    Unassigned,
    /// Attach was refused; the message is the VM's reason
    AttachFailed(String),
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOutcome::Detached => f.write_str("detached"),
            EntryOutcome::AlreadyAbsent => f.write_str("already absent"),
            EntryOutcome::Kept => f.write_str("kept"),
            EntryOutcome::Attached => f.write_str("attached"),
            EntryOutcome::AlreadyAttached => f.write_str("already attached"),
            EntryOutcome::Unassigned => f.write_str("not moved, no free slot"),
            EntryOutcome::AttachFailed(reason) => write!(f, "attach failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub entry: AttachmentPlanEntry,
    pub outcome: EntryOutcome,
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub entries: Vec<ReportEntry>,
    /// VMs without a live channel
    pub unreachable: Vec<String>,
    /// VMs left out because their attachments could not be read
    pub excluded: Vec<String>,
}

impl ReconcileReport {
    fn push(&mut self, entry: AttachmentPlanEntry, outcome: EntryOutcome) {
        self.entries.push(ReportEntry { entry, outcome });
    }

    /// Number of entries that ended in `outcome`
    pub fn count(&self, outcome: &EntryOutcome) -> usize {
        self.entries.iter().filter(|e| &e.outcome == outcome).count()
    }

    pub fn attach_failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::AttachFailed(_)))
    }
}

/// Moves a desired device set onto one VM
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    introspector: Introspector,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(introspector: Introspector, options: ReconcileOptions) -> Self {
        Self {
            introspector,
            options,
        }
    }

    /// Converge `vms` so that the devices selected by `desired` sit on
    /// `target_vm_id` under their slot names
    ///
    /// Fails without side effects when the target has no live channel or
    /// its attachments cannot be read. A detach failure other than "already
    /// absent" aborts before any attach. Attach failures are reported in
    /// the returned [`ReconcileReport`].
    pub async fn reconcile<C: ControlChannel>(
        &self,
        desired: &[TargetDeviceSpec],
        vms: &mut [VmEndpoint<C>],
        target_vm_id: &str,
        inventory: &[HostDevice],
    ) -> Result<ReconcileReport> {
        let target_live = vms
            .iter()
            .any(|vm| vm.vm_id == target_vm_id && vm.is_live());
        if !target_live {
            return Err(HotplugError::NoTargetConnection(target_vm_id.to_string()));
        }

        let mut report = ReconcileReport::default();
        let snapshots = self.snapshot_all(vms, target_vm_id, &mut report).await?;

        let detaches = plan::plan_detaches(desired.len(), &snapshots, target_vm_id, inventory);
        for step in detaches {
            self.run_detach(vms, step, &mut report).await?;
        }

        let target = channel_for(vms, target_vm_id)?;
        let target_snapshot = self.introspector.snapshot(target).await?;
        let attaches = plan::plan_attaches(
            desired,
            &target_snapshot,
            inventory,
            self.options.reverse_match,
        );
        for step in attaches {
            self.run_attach(target, step, &mut report).await;
        }

        info!(
            "Reconciled {} slot(s) onto VM {}: {} attached, {} failed, {} without a slot",
            desired.len(),
            target_vm_id,
            report.count(&EntryOutcome::Attached),
            report.attach_failures().count(),
            report.count(&EntryOutcome::Unassigned)
        );
        Ok(report)
    }

    /// Read every live VM before anything changes
    async fn snapshot_all<C: ControlChannel>(
        &self,
        vms: &mut [VmEndpoint<C>],
        target_vm_id: &str,
        report: &mut ReconcileReport,
    ) -> Result<Vec<AttachmentSnapshot>> {
        let mut snapshots = Vec::new();
        for vm in vms.iter_mut() {
            let Some(channel) = vm.channel.as_mut() else {
                debug!("VM {} has no channel, skipping", vm.vm_id);
                report.unreachable.push(vm.vm_id.clone());
                continue;
            };
            match self.introspector.snapshot(channel).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) if vm.vm_id == target_vm_id => return Err(e),
                Err(e) => {
                    warn!("Excluding VM {}: {}", vm.vm_id, e);
                    report.excluded.push(vm.vm_id.clone());
                }
            }
        }
        Ok(snapshots)
    }

    async fn run_detach<C: ControlChannel>(
        &self,
        vms: &mut [VmEndpoint<C>],
        step: PlannedStep,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let entry = step.entry;
        if step.action == StepAction::Skip(SkipReason::KeptOnTarget) {
            info!(
                "{} stays on target VM {} as {}",
                entry.device_label(),
                entry.vm_id,
                entry.slot
            );
            report.push(entry, EntryOutcome::Kept);
            return Ok(());
        }

        let channel = channel_for(vms, &entry.vm_id)?;
        info!(
            "Detaching {} ({}) from VM {}",
            entry.slot,
            entry.device_label(),
            entry.vm_id
        );
        let outcome = match commands::device_del(channel, entry.slot.as_str()).await {
            Ok(()) => EntryOutcome::Detached,
            Err(e) if e.is_not_found_for(entry.slot.as_str()) => {
                info!("{} was already gone from VM {}", entry.slot, entry.vm_id);
                EntryOutcome::AlreadyAbsent
            }
            Err(e) => {
                return Err(HotplugError::DetachFailed {
                    vm_id: entry.vm_id,
                    slot: entry.slot.to_string(),
                    source: Box::new(e),
                });
            }
        };
        report.push(entry, outcome);

        tokio::time::sleep(self.options.detach_settle).await;
        Ok(())
    }

    async fn run_attach<C: ControlChannel>(
        &self,
        channel: &mut C,
        step: PlannedStep,
        report: &mut ReconcileReport,
    ) {
        let entry = step.entry;
        let device = match (step.action, entry.device.clone()) {
            (StepAction::Issue, Some(device)) => device,
            (StepAction::Skip(SkipReason::NoFreeSlot), _) => {
                warn!(
                    "{} is selected but {} on VM {} is taken, not moving it",
                    entry.device_label(),
                    entry.slot,
                    entry.vm_id
                );
                report.push(entry, EntryOutcome::Unassigned);
                return;
            }
            _ => {
                info!(
                    "{} is already attached to VM {} as {}",
                    entry.device_label(),
                    entry.vm_id,
                    entry.slot
                );
                report.push(entry, EntryOutcome::AlreadyAttached);
                return;
            }
        };

        tokio::time::sleep(self.options.attach_settle).await;
        info!("Attaching {} to VM {} as {}", device, entry.vm_id, entry.slot);
        let result =
            commands::device_add(channel, entry.slot.as_str(), &device.bus_id, &device.port_path)
                .await;
        match result {
            Ok(()) => {
                info!("Attached {} to VM {} as {}", device.vid_pid, entry.vm_id, entry.slot);
                report.push(entry, EntryOutcome::Attached);
            }
            Err(e) => {
                let reason = e.to_string();
                let failure = HotplugError::AttachFailed {
                    vm_id: entry.vm_id.clone(),
                    slot: entry.slot.to_string(),
                    device: device.to_string(),
                    source: Box::new(e),
                };
                warn!("{}", failure);
                report.push(entry, EntryOutcome::AttachFailed(reason));
            }
        }
    }
}

fn channel_for<'a, C>(vms: &'a mut [VmEndpoint<C>], vm_id: &str) -> Result<&'a mut C> {
    vms.iter_mut()
        .find(|vm| vm.vm_id == vm_id)
        .and_then(|vm| vm.channel.as_mut())
        .ok_or_else(|| HotplugError::NoTargetConnection(vm_id.to_string()))
}
