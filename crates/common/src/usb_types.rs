//! Host USB vocabulary
//!
//! - [`HostDevice`]: one USB device as seen by the host after a scan
//! - [`TargetDeviceSpec`]: an operator-supplied `vvvv:pppp` / `vvvv:` selector
//! - [`BusPort`]: a physical position, written `<bus>-<port.path>`
//! - [`VmBinding`]: which VM owns the input device plugged at a position

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical position of a device: bus number and dotted port path
///
/// Unique among currently plugged devices. Written as `2-1.1`, the same
/// form the kernel uses for device directory names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusPort {
    pub bus: String,
    pub port_path: String,
}

impl BusPort {
    pub fn new(bus: impl Into<String>, port_path: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            port_path: port_path.into(),
        }
    }

    /// Parse a `<bus>-<port.path>` name
    ///
    /// Returns `None` for anything else, which includes root hubs (`usb1`)
    /// and interface nodes (`1-1:1.0`).
    pub fn parse(name: &str) -> Option<Self> {
        let (bus, port_path) = name.split_once('-')?;
        if bus.is_empty() || !bus.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let valid_port = port_path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()));
        if !valid_port {
            return None;
        }
        Some(Self::new(bus, port_path))
    }

    /// Numeric ordering key: bus first, then each port hop
    pub fn sort_key(&self) -> (u32, Vec<u32>) {
        let bus = self.bus.parse().unwrap_or(u32::MAX);
        let ports = self
            .port_path
            .split('.')
            .map(|p| p.parse().unwrap_or(u32::MAX))
            .collect();
        (bus, ports)
    }
}

impl fmt::Display for BusPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.bus, self.port_path)
    }
}

impl FromStr for BusPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidPosition(s.to_string()))
    }
}

/// A USB device visible on the host
///
/// Rebuilt by every scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDevice {
    /// `vvvv:pppp`, lowercase hex
    pub vid_pid: String,
    pub bus_id: String,
    pub port_path: String,
    /// Device number on its bus
    pub address_id: String,
    /// Product string, empty when unreadable
    pub product: String,
}

impl HostDevice {
    /// Physical position of this device
    pub fn position(&self) -> BusPort {
        BusPort::new(self.bus_id.clone(), self.port_path.clone())
    }

    /// `<bus>-<port>` key used to cross-reference VM attachments
    pub fn bus_and_port(&self) -> String {
        format!("{}-{}", self.bus_id, self.port_path)
    }

    pub fn is_at(&self, position: &BusPort) -> bool {
        self.bus_id == position.bus && self.port_path == position.port_path
    }
}

impl fmt::Display for HostDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}-{}", self.vid_pid, self.bus_id, self.port_path)?;
        if !self.product.is_empty() {
            write!(f, " ({})", self.product)?;
        }
        Ok(())
    }
}

/// Operator-supplied device selector
///
/// Either a full `vvvv:pppp` or a vendor-only `vvvv:` pattern. Only valid
/// patterns can be constructed, so a malformed spec never reaches matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetDeviceSpec(String);

impl TargetDeviceSpec {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the product half was left out
    pub fn is_vendor_only(&self) -> bool {
        self.0.ends_with(':')
    }

    /// Prefix match against a device's `vvvv:pppp`
    pub fn matches(&self, device: &HostDevice) -> bool {
        device.vid_pid.starts_with(&self.0)
    }

    fn is_valid(s: &str) -> bool {
        let is_hex4 = |part: &str| {
            part.len() == 4
                && part
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        };
        match s.split_once(':') {
            Some((vendor, product)) => is_hex4(vendor) && (product.is_empty() || is_hex4(product)),
            None => false,
        }
    }
}

impl FromStr for TargetDeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidDeviceSpec(s.to_string()))
        }
    }
}

impl TryFrom<String> for TargetDeviceSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TargetDeviceSpec> for String {
    fn from(spec: TargetDeviceSpec) -> Self {
        spec.0
    }
}

impl fmt::Display for TargetDeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that a VM id is usable as a socket file stem
///
/// Accepts ASCII letters, digits, `_`, `-` and `.`, but not `.` or `..`.
pub fn validate_vm_id(vm_id: &str) -> Result<()> {
    let allowed = vm_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if vm_id.is_empty() || !allowed || vm_id == "." || vm_id == ".." {
        return Err(Error::InvalidVmId(vm_id.to_string()));
    }
    Ok(())
}

/// A VM bound to the physical position of its input device
///
/// Written `vmid:bus-port`, e.g. `100:5-2.1.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmBinding {
    pub vm_id: String,
    pub position: BusPort,
}

impl FromStr for VmBinding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidBinding(s.to_string());
        let (vm_id, position) = s.split_once(':').ok_or_else(invalid)?;
        validate_vm_id(vm_id).map_err(|_| invalid())?;
        let position = BusPort::parse(position).ok_or_else(invalid)?;
        Ok(Self {
            vm_id: vm_id.to_string(),
            position,
        })
    }
}

impl TryFrom<String> for VmBinding {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VmBinding> for String {
    fn from(binding: VmBinding) -> Self {
        binding.to_string()
    }
}

impl fmt::Display for VmBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vm_id, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vid_pid: &str) -> HostDevice {
        HostDevice {
            vid_pid: vid_pid.to_string(),
            bus_id: "2".to_string(),
            port_path: "1.1".to_string(),
            address_id: "7".to_string(),
            product: String::new(),
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!("1a2b:3c4d".parse::<TargetDeviceSpec>().is_ok());
        assert!("1a2b:".parse::<TargetDeviceSpec>().is_ok());

        assert!("1A2B:3C4D".parse::<TargetDeviceSpec>().is_err());
        assert!("1a2b".parse::<TargetDeviceSpec>().is_err());
        assert!("1a2b:3c4".parse::<TargetDeviceSpec>().is_err());
        assert!("1a2b:3c4d5".parse::<TargetDeviceSpec>().is_err());
        assert!(":3c4d".parse::<TargetDeviceSpec>().is_err());
        assert!("0x1a:3c4d".parse::<TargetDeviceSpec>().is_err());
        assert!("".parse::<TargetDeviceSpec>().is_err());
    }

    #[test]
    fn test_spec_prefix_match() {
        let vendor: TargetDeviceSpec = "1a2b:".parse().unwrap();
        let exact: TargetDeviceSpec = "1a2b:3c4d".parse().unwrap();

        assert!(vendor.is_vendor_only());
        assert!(vendor.matches(&device("1a2b:3c4d")));
        assert!(vendor.matches(&device("1a2b:ffff")));
        assert!(!vendor.matches(&device("1a2c:3c4d")));

        assert!(exact.matches(&device("1a2b:3c4d")));
        assert!(!exact.matches(&device("1a2b:3c4e")));
    }

    #[test]
    fn test_bus_port_parse() {
        assert_eq!(BusPort::parse("2-1.1"), Some(BusPort::new("2", "1.1")));
        assert_eq!(BusPort::parse("10-4"), Some(BusPort::new("10", "4")));
        assert_eq!(BusPort::parse("usb1"), None);
        assert_eq!(BusPort::parse("1-1:1.0"), None);
        assert_eq!(BusPort::parse("1-1..2"), None);
        assert_eq!(BusPort::parse("-1"), None);
        assert_eq!(BusPort::parse("1-"), None);
    }

    #[test]
    fn test_bus_port_sort_key_is_numeric() {
        let a = BusPort::new("2", "10");
        let b = BusPort::new("10", "1");
        let c = BusPort::new("2", "9.1");
        let mut positions = vec![b.clone(), a.clone(), c.clone()];
        positions.sort_by_key(BusPort::sort_key);
        assert_eq!(positions, vec![c, a, b]);
    }

    #[test]
    fn test_binding_parse() {
        let binding: VmBinding = "100:5-2.1.1".parse().unwrap();
        assert_eq!(binding.vm_id, "100");
        assert_eq!(binding.position, BusPort::new("5", "2.1.1"));
        assert_eq!(binding.to_string(), "100:5-2.1.1");

        assert!("100".parse::<VmBinding>().is_err());
        assert!("100:5".parse::<VmBinding>().is_err());
        assert!(":5-1".parse::<VmBinding>().is_err());
        assert!("../x:5-1".parse::<VmBinding>().is_err());
    }

    #[test]
    fn test_validate_vm_id() {
        assert!(validate_vm_id("100").is_ok());
        assert!(validate_vm_id("win11-gaming").is_ok());
        assert!(validate_vm_id("").is_err());
        assert!(validate_vm_id("..").is_err());
        assert!(validate_vm_id("a/b").is_err());
        assert!(validate_vm_id("a b").is_err());
    }

    #[test]
    fn test_host_device_keys() {
        let dev = device("1a2b:3c4d");
        assert_eq!(dev.bus_and_port(), "2-1.1");
        assert!(dev.is_at(&BusPort::new("2", "1.1")));
        assert!(!dev.is_at(&BusPort::new("2", "1")));
    }
}
