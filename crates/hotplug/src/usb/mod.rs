//! Host USB subsystem
//!
//! Reads the host's current USB topology. Nothing here talks to a VM.

pub mod scanner;

pub use scanner::{DEFAULT_SYSFS_ROOT, SysfsScanner};
