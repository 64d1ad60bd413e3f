//! Device and session type definitions
//!
//! This module defines the value types that cross the bridge boundary:
//! device descriptors, device references, serial line settings, permission
//! state, and session status. All types serialize to the camelCase JSON shape
//! the JavaScript side expects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// OS-assigned device identifier
///
/// Stable only while the device stays attached. On Android this is the
/// `UsbDevice.deviceId`; libusb backends derive it as `bus * 1000 + address`,
/// which matches the Android numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one attached USB device
///
/// A plain value copied out of a catalog query. String fields are supplied by
/// the manufacturer and may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// OS-assigned identifier
    pub device_id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// USB device class
    pub device_class: u8,
    /// USB device protocol
    pub device_protocol: u8,
    /// Number of interfaces in the active configuration
    pub interface_count: u8,
    /// Device node name (e.g. `/dev/bus/usb/001/005`)
    pub device_name: String,
    /// Product string (if available)
    pub product_name: Option<String>,
    /// Manufacturer string (if available)
    pub manufacturer_name: Option<String>,
}

/// How a caller names a device
///
/// The bridge accepts either a numeric deviceId or a string. How a string is
/// matched (device node name, product name, or a numeric id in string form)
/// is decided by the host's lookup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    /// Numeric device id
    Id(DeviceId),
    /// Device name, product name, or id as text
    Name(String),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Id(id) => write!(f, "device {}", id),
            DeviceRef::Name(name) => write!(f, "device '{}'", name),
        }
    }
}

impl From<DeviceId> for DeviceRef {
    fn from(id: DeviceId) -> Self {
        DeviceRef::Id(id)
    }
}

impl From<&str> for DeviceRef {
    fn from(name: &str) -> Self {
        DeviceRef::Name(name.to_string())
    }
}

/// Serial data bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("unsupported data bits: {}", other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    Off,
    RtsCts,
    DsrDtr,
    XonXoff,
}

/// Serial line parameters
///
/// Applied once when a port is opened; there is no mid-session
/// reconfiguration. Defaults to 9600 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::Off,
        }
    }
}

impl LineSettings {
    /// Encode as a CDC ACM line coding structure (`SET_LINE_CODING` payload)
    ///
    /// Layout: dwDTERate (u32 little-endian), bCharFormat, bParityType, bDataBits.
    pub fn line_coding(&self) -> [u8; 7] {
        let rate = self.baud_rate.to_le_bytes();
        let char_format = match self.stop_bits {
            StopBits::One => 0,
            StopBits::OnePointFive => 1,
            StopBits::Two => 2,
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        };

        [
            rate[0],
            rate[1],
            rate[2],
            rate[3],
            char_format,
            parity,
            u8::from(self.data_bits),
        ]
    }
}

/// Per-call overrides for line settings
///
/// Every field is optional; missing fields keep the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<DataBits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<StopBits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_control: Option<FlowControl>,
}

impl LineOverrides {
    /// Apply the overrides on top of `base`
    pub fn apply(self, base: LineSettings) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate.unwrap_or(base.baud_rate),
            data_bits: self.data_bits.unwrap_or(base.data_bits),
            stop_bits: self.stop_bits.unwrap_or(base.stop_bits),
            parity: self.parity.unwrap_or(base.parity),
            flow_control: self.flow_control.unwrap_or(base.flow_control),
        }
    }
}

/// Access grant state for one device
///
/// Never persisted; re-derived from the OS on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// No request made and no grant reported
    Unknown,
    /// OS reports access
    Granted,
    /// The last notification for this device denied access
    Denied,
    /// A request is waiting for the OS notification
    PendingRequest,
}

/// Observable state of the single device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Closed,
    #[serde(rename_all = "camelCase")]
    Open {
        device_id: DeviceId,
        device_name: String,
        interface_number: u8,
        endpoint_address: u8,
        line: LineSettings,
    },
}

/// Data handed to a write
///
/// Text is sent as its UTF-8 bytes; arrays of numbers are sent verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Raw bytes to transfer
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }
}
