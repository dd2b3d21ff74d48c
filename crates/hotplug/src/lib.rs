//! USB hotplug reconciliation for QEMU VMs
//!
//! Moves host USB devices between running VMs by hot-unplugging and
//! hot-plugging them over each VM's QMP socket.
//!
//! - [`usb`]: scans the host's USB topology from sysfs
//! - [`vm`]: QMP control channel and attachment introspection
//! - [`reconcile`]: plans and executes detach-then-attach runs
//! - [`trigger`]: picks the destination VM from a detect device's position
//!
//! # Example
//!
//! ```no_run
//! use hotplug::config::HotplugConfig;
//! use hotplug::reconcile::Reconciler;
//! use hotplug::usb::SysfsScanner;
//! use hotplug::vm::{Introspector, connect_all};
//!
//! # #[tokio::main]
//! # async fn main() -> hotplug::Result<()> {
//! let config = HotplugConfig::default();
//! let inventory = SysfsScanner::default().scan()?;
//! let mut vms = connect_all(&["100".to_string(), "101".to_string()], &config.qmp).await;
//!
//! let reconciler = Reconciler::new(
//!     Introspector::new(config.qmp.machine_bus_path.clone()),
//!     config.reconcile.to_options(),
//! );
//! let desired = vec!["1a2b:3c4d".parse()?];
//! let report = reconciler.reconcile(&desired, &mut vms, "101", &inventory).await?;
//! println!("{} entries", report.entries.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod reconcile;
pub mod test_utils;
pub mod trigger;
pub mod usb;
pub mod vm;

pub use error::{HotplugError, Result};
