//! QMP wire protocol for usb-hotplug
//!
//! This crate defines the messages exchanged with a QEMU monitor socket and
//! their line-delimited JSON encoding. It knows nothing about sockets or
//! timeouts; the `hotplug` crate drives the exchange.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, ServerMessage, decode_message, encode_command};
//!
//! // Build and encode a request
//! let cmd = Command::device_add_usb_host("auto_0", "2", "1.1").with_id("req-1");
//! let bytes = encode_command(&cmd).unwrap();
//! assert!(bytes.ends_with(b"\n"));
//!
//! // Decode a reply
//! let reply = decode_message(br#"{"return": {}, "id": "req-1"}"#).unwrap();
//! assert!(reply.is_reply());
//! ```
//!
//! # Error replies
//!
//! ```
//! use protocol::{ServerMessage, decode_message};
//!
//! let reply = decode_message(
//!     br#"{"error": {"class": "DeviceNotFound", "desc": "Device 'auto_0' not found"}}"#,
//! )
//! .unwrap();
//! match reply {
//!     ServerMessage::Error { error, .. } => assert_eq!(error.class, "DeviceNotFound"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{MAX_MESSAGE_SIZE, decode_message, encode_command, read_message};

#[cfg(feature = "async")]
pub use codec::{read_message_async, read_message_resumable, write_command_async};
pub use error::{ProtocolError, Result};
pub use messages::{Command, Greeting, ServerMessage, USB_HOST_DRIVER, VersionInfo};
pub use types::{EventTimestamp, QmpErrorBody, QomProperty, StatusInfo};
pub use version::QemuVersion;
