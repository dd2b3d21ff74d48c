//! VM control plane
//!
//! One control channel per VM, typed QMP command helpers on top of it, and
//! the attachment introspector that reads a VM's USB device tree.

pub mod channel;
pub mod commands;
pub mod introspect;
pub mod qmp;

pub use channel::ControlChannel;
pub use introspect::{AttachedDevice, AttachmentSnapshot, DEFAULT_MACHINE_BUS_PATH, Introspector};
pub use qmp::{QmpChannel, connect_all};

/// A VM known to this run, with its channel if the connection succeeded
///
/// An endpoint without a channel only shows up in reports as unreachable.
#[derive(Debug)]
pub struct VmEndpoint<C> {
    pub vm_id: String,
    pub channel: Option<C>,
}

impl<C> VmEndpoint<C> {
    pub fn connected(vm_id: impl Into<String>, channel: C) -> Self {
        Self {
            vm_id: vm_id.into(),
            channel: Some(channel),
        }
    }

    pub fn unreachable(vm_id: impl Into<String>) -> Self {
        Self {
            vm_id: vm_id.into(),
            channel: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.channel.is_some()
    }
}
