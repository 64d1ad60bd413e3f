//! Host-side error types
//!
//! Each layer has its own error enum. None of them cross the bridge: the
//! facade converts them into `protocol::BridgeError` at the boundary.

use protocol::{DeviceId, DeviceRef};
use thiserror::Error;

/// OS-level USB failure reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("access denied")]
    Access,
    #[error("device disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("operation timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("input/output error")]
    Io,
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("{0}")]
    Other(String),
}

impl From<rusb::Error> for HostError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Access => HostError::Access,
            rusb::Error::NoDevice => HostError::NoDevice,
            rusb::Error::NotFound => HostError::NotFound,
            rusb::Error::Busy => HostError::Busy,
            rusb::Error::Timeout => HostError::Timeout,
            rusb::Error::Pipe => HostError::Pipe,
            rusb::Error::Io => HostError::Io,
            rusb::Error::InvalidParam => HostError::InvalidParam(err.to_string()),
            _ => HostError::Other(err.to_string()),
        }
    }
}

/// Failure to resolve a device in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("{0} not found")]
    DeviceNotFound(DeviceRef),
    #[error("device enumeration failed: {0}")]
    Host(#[from] HostError),
}

/// Permission Broker failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("permission required for device {device_id}")]
    Required { device_id: DeviceId },
    #[error("permission denied for device {device_id}")]
    Denied { device_id: DeviceId },
    #[error("permission request for device {device_id} was abandoned")]
    Abandoned { device_id: DeviceId },
    #[error("permission request failed: {0}")]
    Host(HostError),
}

/// Session Manager failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("permission required for device {device_id}")]
    PermissionRequired { device_id: DeviceId },
    #[error("port already open on device {device_id}")]
    AlreadyOpen { device_id: DeviceId },
    #[error("Serial port is not open")]
    PortNotOpen,
    #[error("{0}")]
    Connection(String),
    #[error("Failed to open serial port: {0}")]
    OpenFailed(String),
    #[error("Bulk transfer to endpoint {endpoint:#04x} failed: {source}")]
    TransferFailed { endpoint: u8, source: HostError },
}
