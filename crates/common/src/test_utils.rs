//! Test utilities for usb-serial-bridge
//!
//! Provides mock device descriptors and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! # fn main() {
//! let device = create_mock_descriptor(1005, 0x0483, 0x5720);
//! assert_eq!(device.vendor_id, 0x0483);
//! # }
//! ```

use protocol::{DeviceDescriptor, DeviceId};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceDescriptor for testing
///
/// The device id follows the `bus * 1000 + address` numbering, and the
/// device name is the matching `/dev/bus/usb` node.
///
/// # Arguments
/// * `id` - Device ID number
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor;
///
/// let device = create_mock_descriptor(1005, 0x1234, 0x5678);
/// assert_eq!(device.device_id.0, 1005);
/// assert_eq!(device.device_name, "/dev/bus/usb/001/005");
/// ```
pub fn create_mock_descriptor(id: u32, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: DeviceId(id),
        vendor_id,
        product_id,
        device_class: 0x00,
        device_protocol: 0x00,
        interface_count: 1,
        device_name: format!("/dev/bus/usb/{:03}/{:03}", id / 1000, id % 1000),
        product_name: Some(format!("Test Product {}", id)),
        manufacturer_name: Some(format!("Test Manufacturer {}", id)),
    }
}

/// Create a mock receipt printer descriptor with the given product name
pub fn create_mock_printer(id: u32, product_name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        device_class: 0x07,
        product_name: Some(product_name.to_string()),
        manufacturer_name: Some("Test Printer Co".to_string()),
        ..create_mock_descriptor(id, 0x0483, 0x5720)
    }
}

/// Create a mock CDC ACM serial adapter descriptor (two interfaces)
pub fn create_mock_serial_adapter(id: u32) -> DeviceDescriptor {
    DeviceDescriptor {
        device_class: 0x02,
        interface_count: 2,
        product_name: Some("Test Serial Adapter".to_string()),
        ..create_mock_descriptor(id, 0x2341, 0x0043)
    }
}

/// Create mock print data of a given size
///
/// Printable ASCII with a newline every 48 columns, like a receipt line.
pub fn create_mock_print_job(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| if i % 49 == 48 { b'\n' } else { b'A' + (i % 26) as u8 })
        .collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Arguments
/// * `duration` - Maximum time to wait
/// * `future` - The async operation to run
///
/// # Returns
/// Result containing the operation result or a timeout error
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
