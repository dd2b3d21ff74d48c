//! Hotplug error taxonomy
//!
//! Every failure the engine can report, split by what the caller should do
//! about it:
//! - fatal before any side effect: `ScanUnavailable`, `NoTargetConnection`,
//!   `DetectDeviceNotFound`
//! - fatal for the run: `DetachFailed`, and `IntrospectionFailed` /
//!   `Unreachable` when they concern the target VM
//! - logged and skipped: `AttachFailed`, and `IntrospectionFailed` /
//!   `Unreachable` for any other VM
//!
//! `Protocol`, `Command` and `Timeout` describe a single failed call and
//! are wrapped by whichever of the above applies at the call site.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HotplugError {
    /// Host USB topology could not be read
    #[error("USB topology unavailable, cannot read {path}: {source}")]
    ScanUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Control channel could not be opened or failed its liveness probe
    #[error("VM {vm_id} is unreachable: {reason}")]
    Unreachable { vm_id: String, reason: String },

    /// Wire-level failure on the control channel
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    /// The VM rejected a command; `desc` is the remote message verbatim
    #[error("Command '{command}' failed: {desc} ({class})")]
    Command {
        command: String,
        class: String,
        desc: String,
    },

    /// No reply within the command timeout
    #[error("Command '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// A VM's attachment tree could not be fully read
    #[error("Failed to introspect attached devices on VM {vm_id}: {source}")]
    IntrospectionFailed {
        vm_id: String,
        #[source]
        source: Box<HotplugError>,
    },

    /// Detaching a slot failed for a reason other than "already absent"
    #[error("Failed to detach {slot} from VM {vm_id}: {source}")]
    DetachFailed {
        vm_id: String,
        slot: String,
        #[source]
        source: Box<HotplugError>,
    },

    /// Attaching one device failed
    #[error("Failed to attach {device} as {slot} to VM {vm_id}: {source}")]
    AttachFailed {
        vm_id: String,
        slot: String,
        device: String,
        #[source]
        source: Box<HotplugError>,
    },

    /// The destination VM has no live control channel
    #[error("No connection for target VM: {0}")]
    NoTargetConnection(String),

    /// The device used to pick the destination VM is not plugged in
    #[error("Detect device {0} not found on any USB bus")]
    DetectDeviceNotFound(String),

    /// Invalid configuration or arguments
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HotplugError {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HotplugError::AttachFailed { .. })
    }

    /// Whether this is the VM's answer to deleting a device id it does not have
    pub fn is_not_found_for(&self, id: &str) -> bool {
        match self {
            HotplugError::Command { class, desc, .. } => {
                class == "DeviceNotFound" || *desc == format!("Device '{}' not found", id)
            }
            _ => false,
        }
    }
}

impl From<common::Error> for HotplugError {
    fn from(err: common::Error) -> Self {
        HotplugError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HotplugError>;
