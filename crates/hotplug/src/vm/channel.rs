//! Control channel abstraction
//!
//! The reconciliation engine and introspector only need "send one command,
//! get one reply". [`QmpChannel`](super::QmpChannel) implements it over a
//! Unix socket; tests implement it with an in-memory device model.

use crate::error::Result;
use protocol::Command;
use serde_json::Value;
use std::future::Future;

/// A request/response session with one VM
pub trait ControlChannel {
    /// Identifier of the VM on the other end
    fn vm_id(&self) -> &str;

    /// Send `command` and wait for its reply
    ///
    /// Resolves to the reply's `return` payload. A remote error reply
    /// resolves to [`HotplugError::Command`](crate::HotplugError::Command)
    /// carrying the VM's description verbatim.
    fn execute(&mut self, command: Command) -> impl Future<Output = Result<Value>>;
}
