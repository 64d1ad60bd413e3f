//! Device profiles
//!
//! The behaviours that differ between serial adapters and one-shot receipt
//! printers (lookup key, interface and endpoint choice, line setup, post-write
//! bytes, auto-close) are profile settings rather than code paths.

use crate::usb::backend::{EndpointDescriptor, InterfaceDescriptor};
use crate::usb::catalog::LookupKey;
use protocol::LineSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bulk transfer timeout in milliseconds
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 5000;

/// ESC/POS partial cut with a 16-dot feed
pub const ESC_POS_CUT: [u8; 4] = [0x1D, 0x56, 0x41, 0x10];

/// Which endpoint of the selected interface carries the payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSelector {
    /// Endpoint 0 of the interface, whatever its direction
    #[default]
    First,
    /// First bulk OUT endpoint
    FirstBulkOut,
    /// Endpoint with this address
    Address(u8),
}

impl EndpointSelector {
    pub fn select(&self, interface: &InterfaceDescriptor) -> Option<EndpointDescriptor> {
        match self {
            EndpointSelector::First => interface.endpoints.first().copied(),
            EndpointSelector::FirstBulkOut => interface
                .endpoints
                .iter()
                .find(|e| e.is_bulk_out())
                .copied(),
            EndpointSelector::Address(address) => interface
                .endpoints
                .iter()
                .find(|e| e.address == *address)
                .copied(),
        }
    }
}

/// How line settings reach the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialDriver {
    /// Settings are recorded but never sent
    #[default]
    Raw,
    /// CDC ACM class requests at open time
    CdcAcm,
}

/// What happens to the session after a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterWrite {
    #[default]
    KeepOpen,
    /// Release the interface and close the connection after every write
    Close,
}

/// Named starting points for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// CDC ACM serial adapter addressed by device node
    Serial,
    /// ESC/POS printer addressed by product name, cut and release per write
    ReceiptPrinter,
}

impl Preset {
    pub fn profile(self) -> DeviceProfile {
        match self {
            Preset::Serial => DeviceProfile {
                lookup: LookupKey::DeviceName,
                interface_index: 1,
                endpoint: EndpointSelector::FirstBulkOut,
                driver: SerialDriver::CdcAcm,
                control_interface: 0,
                ..DeviceProfile::default()
            },
            Preset::ReceiptPrinter => DeviceProfile {
                lookup: LookupKey::ProductName,
                interface_index: 0,
                endpoint: EndpointSelector::First,
                driver: SerialDriver::Raw,
                after_write: AfterWrite::Close,
                post_write: ESC_POS_CUT.to_vec(),
                ..DeviceProfile::default()
            },
        }
    }
}

/// Fully resolved session behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub lookup: LookupKey,
    /// Position of the data interface in the active configuration
    pub interface_index: u8,
    pub endpoint: EndpointSelector,
    pub driver: SerialDriver,
    /// Position of the CDC communication interface
    pub control_interface: u8,
    pub transfer_timeout: Duration,
    pub after_write: AfterWrite,
    /// Sent after every successful payload transfer
    pub post_write: Vec<u8>,
    /// Line settings before per-call overrides
    pub line: LineSettings,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            lookup: LookupKey::DeviceName,
            interface_index: 0,
            endpoint: EndpointSelector::First,
            driver: SerialDriver::Raw,
            control_interface: 0,
            transfer_timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            after_write: AfterWrite::KeepOpen,
            post_write: Vec::new(),
            line: LineSettings::default(),
        }
    }
}
