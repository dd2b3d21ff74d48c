//! Test utilities for usb-hotplug
//!
//! Provides builders for host inventories and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_mock_host_device, spec};
//!
//! let device = create_mock_host_device("2", "1.1", "1a2b:3c4d");
//! assert!(spec("1a2b:").matches(&device));
//! ```

use crate::{HostDevice, TargetDeviceSpec, VmBinding};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock HostDevice at a bus/port position
///
/// # Example
/// ```
/// use common::test_utils::create_mock_host_device;
///
/// let device = create_mock_host_device("2", "1.1", "1a2b:3c4d");
/// assert_eq!(device.bus_and_port(), "2-1.1");
/// ```
pub fn create_mock_host_device(bus: &str, port_path: &str, vid_pid: &str) -> HostDevice {
    HostDevice {
        vid_pid: vid_pid.to_string(),
        bus_id: bus.to_string(),
        port_path: port_path.to_string(),
        address_id: format!("{}", port_path.len() + 1),
        product: format!("Test Product {}", vid_pid),
    }
}

/// Create an inventory of `count` distinct devices on bus 1
///
/// Devices sit on ports `1`..=`count` with ids `10{n:02x}:20{n:02x}`.
pub fn create_mock_inventory(count: u8) -> Vec<HostDevice> {
    (1..=count)
        .map(|n| {
            create_mock_host_device(
                "1",
                &n.to_string(),
                &format!("10{:02x}:20{:02x}", n, n),
            )
        })
        .collect()
}

/// Parse a spec, panicking on invalid input (tests only)
pub fn spec(s: &str) -> TargetDeviceSpec {
    s.parse()
        .unwrap_or_else(|e| panic!("invalid test spec {}: {}", s, e))
}

/// Parse a list of specs
pub fn specs(list: &[&str]) -> Vec<TargetDeviceSpec> {
    list.iter().map(|s| spec(s)).collect()
}

/// Parse a binding, panicking on invalid input (tests only)
pub fn binding(s: &str) -> VmBinding {
    s.parse()
        .unwrap_or_else(|e| panic!("invalid test binding {}: {}", s, e))
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test operation times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
