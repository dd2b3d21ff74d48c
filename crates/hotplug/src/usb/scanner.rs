//! USB topology scanner
//!
//! Enumerates devices from the kernel's sysfs view. Each physical device
//! has a directory named `<bus>-<port.path>` holding small text attribute
//! files (`idVendor`, `idProduct`, `devnum`, `product`). Root hubs and
//! interface nodes use other names and are skipped.

use crate::error::{HotplugError, Result};
use common::{BusPort, HostDevice};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Where the kernel exposes USB devices
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/usb/devices";

/// Scanner over a sysfs-shaped directory
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    root: PathBuf,
}

impl Default for SysfsScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SysfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scan all currently plugged devices
    ///
    /// Fails if the root cannot be listed or if a device's vendor id,
    /// product id or device number cannot be read, since a device with a
    /// partial identity cannot be matched safely. An unreadable product
    /// name degrades to an empty string.
    ///
    /// Results are ordered by bus, then port path.
    pub fn scan(&self) -> Result<Vec<HostDevice>> {
        let entries = fs::read_dir(&self.root).map_err(|source| HotplugError::ScanUnavailable {
            path: self.root.clone(),
            source,
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HotplugError::ScanUnavailable {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(position) = name.to_str().and_then(BusPort::parse) else {
                trace!("Skipping sysfs entry {:?}", name);
                continue;
            };
            devices.push(self.read_device(&entry.path(), position)?);
        }

        devices.sort_by_key(|d| d.position().sort_key());
        debug!(
            "Scanned {} USB device(s) under {}",
            devices.len(),
            self.root.display()
        );
        Ok(devices)
    }

    fn read_device(&self, dir: &Path, position: BusPort) -> Result<HostDevice> {
        let vendor = read_attribute(dir, "idVendor")?;
        let product_id = read_attribute(dir, "idProduct")?;
        let address_id = read_attribute(dir, "devnum")?;
        let product = read_attribute(dir, "product").unwrap_or_default();

        Ok(HostDevice {
            vid_pid: format!(
                "{}:{}",
                vendor.to_ascii_lowercase(),
                product_id.to_ascii_lowercase()
            ),
            bus_id: position.bus,
            port_path: position.port_path,
            address_id,
            product,
        })
    }
}

fn read_attribute(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(content.trim_matches(['\n', '\r', ' ']).to_string()),
        Err(source) => Err(HotplugError::ScanUnavailable { path, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_device(root: &Path, name: &str, vid: &str, pid: &str, product: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("idVendor"), format!("{}\n", vid)).unwrap();
        fs::write(dir.join("idProduct"), format!("{}\n", pid)).unwrap();
        fs::write(dir.join("devnum"), "4\n").unwrap();
        if let Some(product) = product {
            fs::write(dir.join("product"), format!("{}\n", product)).unwrap();
        }
    }

    #[test]
    fn test_scan_reads_identity() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "2-1.1", "1A2B", "3c4d", Some("Gamepad"));

        let devices = SysfsScanner::new(tmp.path()).scan().unwrap();
        assert_eq!(devices.len(), 1);
        let dev = &devices[0];
        assert_eq!(dev.vid_pid, "1a2b:3c4d");
        assert_eq!(dev.bus_id, "2");
        assert_eq!(dev.port_path, "1.1");
        assert_eq!(dev.address_id, "4");
        assert_eq!(dev.product, "Gamepad");
    }

    #[test]
    fn test_missing_product_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "1-3", "dead", "beef", None);

        let devices = SysfsScanner::new(tmp.path()).scan().unwrap();
        assert_eq!(devices[0].product, "");
    }

    #[test]
    fn test_non_device_entries_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "1-3", "dead", "beef", None);
        fs::create_dir_all(tmp.path().join("usb1")).unwrap();
        fs::create_dir_all(tmp.path().join("1-3:1.0")).unwrap();

        let devices = SysfsScanner::new(tmp.path()).scan().unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn test_missing_vendor_id_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("1-2");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("idProduct"), "0001\n").unwrap();
        fs::write(dir.join("devnum"), "3\n").unwrap();

        let err = SysfsScanner::new(tmp.path()).scan().unwrap_err();
        match err {
            HotplugError::ScanUnavailable { path, .. } => assert!(path.ends_with("idVendor")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_root_is_scan_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SysfsScanner::new(tmp.path().join("absent")).scan().unwrap_err();
        assert!(matches!(err, HotplugError::ScanUnavailable { .. }));
    }

    #[test]
    fn test_scan_order_is_numeric() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "10-1", "0001", "0001", None);
        write_device(tmp.path(), "2-10", "0002", "0002", None);
        write_device(tmp.path(), "2-9", "0003", "0003", None);

        let devices = SysfsScanner::new(tmp.path()).scan().unwrap();
        let order: Vec<_> = devices.iter().map(HostDevice::bus_and_port).collect();
        assert_eq!(order, vec!["2-9", "2-10", "10-1"]);
    }
}
