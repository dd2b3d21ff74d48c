//! QMP message definitions
//!
//! This module defines the two directions of the QEMU Machine Protocol:
//! - [`Command`]: the request envelope sent by the client
//! - [`ServerMessage`]: everything QEMU writes back (greeting, return,
//!   error, asynchronous event)
//!
//! The protocol is strictly request-then-one-reply. Events may be
//! interleaved between replies and are classified separately so callers
//! can skip them.

use crate::types::{EventTimestamp, QmpErrorBody};
use crate::version::QemuVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Driver name for host USB passthrough devices
pub const USB_HOST_DRIVER: &str = "usb-host";

/// Request envelope: `{"execute": ..., "arguments": {...}, "id": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (e.g. `device_add`)
    pub execute: String,
    /// Command arguments, omitted on the wire when empty
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    /// Client-chosen identifier echoed back in the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Command {
    /// Create a command without arguments
    pub fn new(execute: impl Into<String>) -> Self {
        Self {
            execute: execute.into(),
            arguments: Map::new(),
            id: None,
        }
    }

    /// Add an argument
    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    /// Attach a request identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Look up a string argument
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }

    /// Capabilities negotiation, required once after the greeting
    pub fn qmp_capabilities() -> Self {
        Self::new("qmp_capabilities")
    }

    /// Run state query, used as the liveness probe
    pub fn query_status() -> Self {
        Self::new("query-status")
    }

    /// Hot-plug a host USB device identified by its physical position
    pub fn device_add_usb_host(id: &str, hostbus: &str, hostport: &str) -> Self {
        Self::new("device_add")
            .arg("driver", USB_HOST_DRIVER)
            .arg("id", id)
            .arg("hostbus", hostbus)
            .arg("hostport", hostport)
    }

    /// Hot-unplug a device by its identifier
    pub fn device_del(id: &str) -> Self {
        Self::new("device_del").arg("id", id)
    }

    /// List the properties of a QOM object
    pub fn qom_list(path: &str) -> Self {
        Self::new("qom-list").arg("path", path)
    }

    /// Read one property of a QOM object
    pub fn qom_get(path: &str, property: &str) -> Self {
        Self::new("qom-get")
            .arg("path", path)
            .arg("property", property)
    }
}

/// Greeting payload sent once when a client connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub version: VersionInfo,
    #[serde(default)]
    pub capabilities: Vec<Value>,
}

/// Version block of the greeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub qemu: QemuVersion,
    #[serde(default)]
    pub package: String,
}

/// Any message QEMU writes to the monitor socket
///
/// Variant order matters for untagged decoding: replies are tried before
/// events and the greeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Successful reply
    Return {
        #[serde(rename = "return")]
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// Failed reply
    Error {
        error: QmpErrorBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// Asynchronous event (e.g. `DEVICE_DELETED`)
    Event {
        event: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<EventTimestamp>,
    },

    /// Connection greeting
    Greeting {
        #[serde(rename = "QMP")]
        qmp: Greeting,
    },
}

impl ServerMessage {
    /// Build a successful reply
    pub fn ok(value: Value) -> Self {
        ServerMessage::Return { value, id: None }
    }

    /// Identifier echoed by a reply, if any
    pub fn reply_id(&self) -> Option<&Value> {
        match self {
            ServerMessage::Return { id, .. } | ServerMessage::Error { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// Whether this message answers a request
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            ServerMessage::Return { .. } | ServerMessage::Error { .. }
        )
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Return { .. } => "return",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Event { .. } => "event",
            ServerMessage::Greeting { .. } => "greeting",
        }
    }
}
