//! Device Catalog
//!
//! Stateless: every query enumerates the OS device list afresh, since devices
//! attach and detach between calls. Lookups are pure queries over one
//! snapshot.

use crate::error::{HostError, LookupError};
use crate::usb::backend::UsbHost;
use protocol::{DeviceDescriptor, DeviceId, DeviceRef};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a device name string is matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKey {
    /// Device node name, e.g. `/dev/bus/usb/001/005`
    #[default]
    DeviceName,
    /// Manufacturer-supplied product string
    ProductName,
    /// Numeric device id written as text
    DeviceId,
}

/// Catalog with optional VID:PID filters
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    filters: Vec<String>,
}

impl DeviceCatalog {
    pub fn new(filters: Vec<String>) -> Self {
        Self { filters }
    }

    /// Enumerate attached devices that pass the filters
    pub fn snapshot<H: UsbHost>(&self, host: &mut H) -> Result<CatalogSnapshot, HostError> {
        let devices: Vec<DeviceDescriptor> = host
            .devices()?
            .into_iter()
            .filter(|d| {
                let allowed = check_filter(d.vendor_id, d.product_id, &self.filters);
                if !allowed {
                    debug!(
                        "Device ignored by filter: id={}, vid={:#06x}, pid={:#06x}",
                        d.device_id, d.vendor_id, d.product_id
                    );
                }
                allowed
            })
            .collect();

        Ok(CatalogSnapshot { devices })
    }

    /// Resolve a caller-supplied reference against a fresh snapshot
    pub fn resolve<H: UsbHost>(
        &self,
        host: &mut H,
        device: &DeviceRef,
        key: LookupKey,
    ) -> Result<DeviceDescriptor, LookupError> {
        self.snapshot(host)?
            .find(device, key)
            .cloned()
            .ok_or_else(|| LookupError::DeviceNotFound(device.clone()))
    }
}

/// One enumeration result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    devices: Vec<DeviceDescriptor>,
}

impl CatalogSnapshot {
    pub fn find_by_device_id(&self, id: DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.device_id == id)
    }

    /// First device with this product string. Several attached devices of the
    /// same model are indistinguishable here; the earliest enumerated wins.
    pub fn find_by_product_name(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.product_name.as_deref() == Some(name))
    }

    pub fn find_by_device_name(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.device_name == name)
    }

    pub fn find(&self, device: &DeviceRef, key: LookupKey) -> Option<&DeviceDescriptor> {
        match device {
            DeviceRef::Id(id) => self.find_by_device_id(*id),
            DeviceRef::Name(name) => match key {
                LookupKey::DeviceName => self.find_by_device_name(name),
                LookupKey::ProductName => self.find_by_product_name(name),
                LookupKey::DeviceId => name
                    .trim()
                    .parse()
                    .ok()
                    .and_then(|id| self.find_by_device_id(DeviceId(id))),
            },
        }
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<DeviceDescriptor> {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl From<Vec<DeviceDescriptor>> for CatalogSnapshot {
    fn from(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

/// Check a VID/PID pair against `0xVID:0xPID` filter patterns
///
/// An empty filter list allows everything. Either half may be `*`.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_hex(filter_vid, vid) && matches_hex(filter_pid, pid)
    })
}

fn matches_hex(pattern: &str, value: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let digits = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(digits, 16).is_ok_and(|v| v == value)
}
