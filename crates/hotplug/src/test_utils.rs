//! Test utilities for the hotplug engine
//!
//! [`FakeVm`] is an in-memory stand-in for QEMU's device model: it answers
//! `qom-list`, `qom-get`, `device_add`, `device_del` and `query-status`
//! with the same shapes QEMU uses, and records every command in a
//! [`CallLog`] that several fake VMs can share, so tests can assert on
//! cross-VM ordering.
//!
//! # Example
//!
//! ```
//! use hotplug::test_utils::{CallLog, FakeVm};
//! use hotplug::vm::Introspector;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let log = CallLog::new();
//! let mut vm = FakeVm::new("100", &log).with_device("auto_0", 2, "1.1");
//!
//! let attached = Introspector::default().list_attached(&mut vm).await.unwrap();
//! assert_eq!(attached[0].bus_and_port, "2-1.1");
//! # }
//! ```

use crate::error::{HotplugError, Result};
use crate::vm::{ControlChannel, DEFAULT_MACHINE_BUS_PATH};
use protocol::Command;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

const CONTROLLER: &str = "usb";
const BUS: &str = "usb-bus.0";

/// One command as received by a fake VM
#[derive(Debug, Clone)]
pub struct Call {
    pub vm_id: String,
    pub command: Command,
    pub at: Instant,
}

impl Call {
    pub fn execute(&self) -> &str {
        &self.command.execute
    }

    /// The `id` argument, for `device_add` / `device_del`
    pub fn device_id(&self) -> Option<&str> {
        self.command.argument_str("id")
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self.execute(), "device_add" | "device_del")
    }
}

/// Shared, ordered record of commands sent to fake VMs
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, vm_id: &str, command: &Command) {
        self.lock().push(Call {
            vm_id: vm_id.to_string(),
            command: command.clone(),
            at: Instant::now(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    /// Only `device_add` and `device_del` calls, in order
    pub fn mutations(&self) -> Vec<Call> {
        self.lock().iter().filter(|c| c.is_mutation()).cloned().collect()
    }

    pub fn attaches(&self) -> Vec<Call> {
        self.with_name("device_add")
    }

    pub fn detaches(&self) -> Vec<Call> {
        self.with_name("device_del")
    }

    fn with_name(&self, execute: &str) -> Vec<Call> {
        self.lock()
            .iter()
            .filter(|c| c.execute() == execute)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct FakeDevice {
    link: String,
    id: String,
    hostbus: u64,
    hostport: String,
}

#[derive(Debug, Clone)]
struct Fault {
    execute: String,
    argument: Option<String>,
    class: String,
    desc: String,
}

impl Fault {
    fn matches(&self, command: &Command) -> bool {
        if self.execute != command.execute {
            return false;
        }
        match &self.argument {
            Some(expected) => command
                .arguments
                .values()
                .any(|v| v.as_str() == Some(expected)),
            None => true,
        }
    }
}

/// In-memory QEMU device model
#[derive(Debug)]
pub struct FakeVm {
    vm_id: String,
    root: String,
    devices: Vec<FakeDevice>,
    next_link: usize,
    faults: Vec<Fault>,
    log: CallLog,
}

impl FakeVm {
    pub fn new(vm_id: &str, log: &CallLog) -> Self {
        Self {
            vm_id: vm_id.to_string(),
            root: DEFAULT_MACHINE_BUS_PATH.to_string(),
            devices: Vec::new(),
            next_link: 0,
            faults: Vec::new(),
            log: log.clone(),
        }
    }

    /// Start with a device already attached under `id`
    pub fn with_device(mut self, id: &str, hostbus: u64, hostport: &str) -> Self {
        self.plug(id, hostbus, hostport);
        self
    }

    /// Answer every `execute` command whose arguments contain `argument`
    /// (or every one, when `None`) with an error reply
    pub fn with_fault(mut self, execute: &str, argument: Option<&str>, class: &str, desc: &str) -> Self {
        self.faults.push(Fault {
            execute: execute.to_string(),
            argument: argument.map(str::to_string),
            class: class.to_string(),
            desc: desc.to_string(),
        });
        self
    }

    /// Identifiers currently attached, in attach order
    pub fn attached_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }

    fn plug(&mut self, id: &str, hostbus: u64, hostport: &str) {
        self.devices.push(FakeDevice {
            link: format!("child[{}]", self.next_link),
            id: id.to_string(),
            hostbus,
            hostport: hostport.to_string(),
        });
        self.next_link += 1;
    }

    fn controller_path(&self) -> String {
        format!("{}/{}", self.root, CONTROLLER)
    }

    fn bus_path(&self) -> String {
        format!("{}/{}/{}", self.root, CONTROLLER, BUS)
    }

    fn answer(&mut self, command: &Command) -> std::result::Result<Value, (String, String)> {
        if let Some(fault) = self.faults.iter().find(|f| f.matches(command)) {
            return Err((fault.class.clone(), fault.desc.clone()));
        }

        let arg = |name: &str| command.argument_str(name).unwrap_or_default().to_string();
        match command.execute.as_str() {
            "qmp_capabilities" => Ok(json!({})),
            "query-status" => Ok(json!({"running": true, "singlestep": false, "status": "running"})),
            "qom-list" => self.qom_list(&arg("path")),
            "qom-get" => self.qom_get(&arg("path"), &arg("property")),
            "device_add" => {
                let id = arg("id");
                if self.devices.iter().any(|d| d.id == id) {
                    return Err((
                        "GenericError".to_string(),
                        format!("Duplicate device ID '{}' for device", id),
                    ));
                }
                let hostbus = arg("hostbus").parse().map_err(|_| {
                    ("GenericError".to_string(), "Parameter 'hostbus' expects uint32".to_string())
                })?;
                self.plug(&id, hostbus, &arg("hostport"));
                Ok(json!({}))
            }
            "device_del" => {
                let id = arg("id");
                match self.devices.iter().position(|d| d.id == id) {
                    Some(index) => {
                        self.devices.remove(index);
                        Ok(json!({}))
                    }
                    None => Err((
                        "DeviceNotFound".to_string(),
                        format!("Device '{}' not found", id),
                    )),
                }
            }
            other => Err((
                "CommandNotFound".to_string(),
                format!("The command {} has not been found", other),
            )),
        }
    }

    fn qom_list(&self, path: &str) -> std::result::Result<Value, (String, String)> {
        if path == self.root {
            Ok(json!([
                {"name": "type", "type": "string"},
                {"name": "pcie.1", "type": "child<pcie-root-port>"},
                {"name": CONTROLLER, "type": "child<nec-usb-xhci>"},
            ]))
        } else if path == self.controller_path() {
            Ok(json!([
                {"name": "type", "type": "string"},
                {"name": BUS, "type": "child<usb-bus>"},
            ]))
        } else if path == self.bus_path() {
            let mut props = vec![json!({"name": "type", "type": "string"})];
            props.extend(
                self.devices
                    .iter()
                    .map(|d| json!({"name": d.link, "type": "link<usb-host>"})),
            );
            Ok(Value::Array(props))
        } else {
            Err(not_found(path))
        }
    }

    fn qom_get(&self, path: &str, property: &str) -> std::result::Result<Value, (String, String)> {
        let bus_path = self.bus_path();
        if path == bus_path {
            return self
                .devices
                .iter()
                .find(|d| d.link == property)
                .map(|d| json!(format!("/machine/peripheral/{}", d.id)))
                .ok_or_else(|| not_found(&format!("{}/{}", path, property)));
        }

        let device = path
            .strip_prefix(bus_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|link| self.devices.iter().find(|d| d.link == link))
            .ok_or_else(|| not_found(path))?;
        match property {
            "hostbus" => Ok(json!(device.hostbus)),
            "hostport" => Ok(json!(device.hostport)),
            _ => Err(not_found(&format!("{}/{}", path, property))),
        }
    }
}

fn not_found(path: &str) -> (String, String) {
    ("DeviceNotFound".to_string(), format!("Device '{}' not found", path))
}

impl ControlChannel for FakeVm {
    fn vm_id(&self) -> &str {
        &self.vm_id
    }

    async fn execute(&mut self, command: Command) -> Result<Value> {
        self.log.record(&self.vm_id, &command);
        self.answer(&command).map_err(|(class, desc)| HotplugError::Command {
            command: command.execute.clone(),
            class,
            desc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Introspector, commands};

    #[tokio::test]
    async fn test_fake_vm_add_and_list() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log);
        commands::device_add(&mut vm, "auto_0", "3", "1.2").await.unwrap();

        let attached = Introspector::default().list_attached(&mut vm).await.unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].generated_id, "auto_0");
        assert_eq!(attached[0].bus_and_port, "3-1.2");
        assert_eq!(log.attaches().len(), 1);
    }

    #[tokio::test]
    async fn test_fake_vm_duplicate_add_is_rejected() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log).with_device("auto_0", 1, "1");
        let err = commands::device_add(&mut vm, "auto_0", "1", "2").await.unwrap_err();
        assert!(err.to_string().contains("Duplicate device ID"));
    }

    #[tokio::test]
    async fn test_fake_vm_del_missing_is_not_found() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log);
        let err = commands::device_del(&mut vm, "auto_4").await.unwrap_err();
        assert!(err.is_not_found_for("auto_4"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log)
            .with_device("auto_0", 1, "1")
            .with_fault("device_del", Some("auto_0"), "GenericError", "bus busy");
        let err = commands::device_del(&mut vm, "auto_0").await.unwrap_err();
        assert!(!err.is_not_found_for("auto_0"));
        assert_eq!(vm.attached_ids(), vec!["auto_0"]);
    }
}
