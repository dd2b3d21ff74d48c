//! Attachment introspection
//!
//! QEMU does not offer a "list passthrough devices" command, so the
//! attachments are read off the QOM tree, three levels below the machine
//! bus:
//!
//! ```text
//! /machine/q35/pcie.0              root bus
//!   usb          child<nec-usb-xhci>   type contains "usb"
//!     usb-bus.0  child<usb-bus>
//!       child[0] link<usb-host>    -> /machine/peripheral/auto_0
//! ```
//!
//! The link's value is the attached device's canonical path, whose last
//! segment is the identifier it was added under. `hostbus` and `hostport`
//! are read through the link.

use super::{ControlChannel, commands};
use crate::error::{HotplugError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Machine bus the walk starts from on q35 machines
pub const DEFAULT_MACHINE_BUS_PATH: &str = "/machine/q35/pcie.0";

/// One host USB device passed through to a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDevice {
    /// Identifier the device was added under (`auto_0`, `hotplug_17`, ...)
    pub generated_id: String,
    /// QOM path of the link on the USB bus
    pub tree_path: String,
    /// Canonical path the link points to
    pub host_link_path: String,
    /// `<hostbus>-<hostport>` of the backing host device
    pub bus_and_port: String,
}

/// Attachments of one VM at one point in time, keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct AttachmentSnapshot {
    vm_id: String,
    devices: BTreeMap<String, AttachedDevice>,
}

impl AttachmentSnapshot {
    pub fn new(vm_id: impl Into<String>, devices: impl IntoIterator<Item = AttachedDevice>) -> Self {
        Self {
            vm_id: vm_id.into(),
            devices: devices
                .into_iter()
                .map(|d| (d.generated_id.clone(), d))
                .collect(),
        }
    }

    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&AttachedDevice> {
        self.devices.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttachedDevice> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Walks a VM's QOM tree for passthrough USB devices
#[derive(Debug, Clone)]
pub struct Introspector {
    root: String,
}

impl Default for Introspector {
    fn default() -> Self {
        Self::new(DEFAULT_MACHINE_BUS_PATH)
    }
}

impl Introspector {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// List every passthrough device attached to the VM behind `channel`
    ///
    /// All-or-nothing: any failed query fails the whole listing with
    /// [`HotplugError::IntrospectionFailed`].
    pub async fn list_attached<C: ControlChannel>(
        &self,
        channel: &mut C,
    ) -> Result<Vec<AttachedDevice>> {
        let vm_id = channel.vm_id().to_string();
        self.walk(channel)
            .await
            .map_err(|source| HotplugError::IntrospectionFailed {
                vm_id,
                source: Box::new(source),
            })
    }

    /// Same as [`list_attached`](Self::list_attached), keyed by identifier
    pub async fn snapshot<C: ControlChannel>(&self, channel: &mut C) -> Result<AttachmentSnapshot> {
        let devices = self.list_attached(channel).await?;
        let snapshot = AttachmentSnapshot::new(channel.vm_id(), devices);
        debug!(
            "VM {} has {} passthrough device(s) attached",
            snapshot.vm_id(),
            snapshot.len()
        );
        Ok(snapshot)
    }

    async fn walk<C: ControlChannel>(&self, channel: &mut C) -> Result<Vec<AttachedDevice>> {
        let mut found = Vec::new();

        for controller in commands::qom_list(channel, &self.root).await? {
            if !controller.kind.contains("usb") {
                continue;
            }
            let controller_path = format!("{}/{}", self.root, controller.name);

            for bus in commands::qom_list(channel, &controller_path).await? {
                if !bus.is_child_of("usb-bus") {
                    continue;
                }
                let bus_path = format!("{}/{}", controller_path, bus.name);

                for link in commands::qom_list(channel, &bus_path).await? {
                    if !link.is_link_to("usb-host") {
                        continue;
                    }
                    let tree_path = format!("{}/{}", bus_path, link.name);
                    let host_link_path: String =
                        commands::qom_get(channel, &bus_path, &link.name).await?;
                    let hostbus: u64 = commands::qom_get(channel, &tree_path, "hostbus").await?;
                    let hostport: String =
                        commands::qom_get(channel, &tree_path, "hostport").await?;

                    let generated_id = host_link_path
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string();

                    found.push(AttachedDevice {
                        generated_id,
                        tree_path,
                        host_link_path,
                        bus_and_port: format!("{}-{}", hostbus, hostport),
                    });
                }
            }
        }

        Ok(found)
    }
}
