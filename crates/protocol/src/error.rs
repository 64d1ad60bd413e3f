//! Protocol error types
//!
//! Two families live here: `ProtocolError` for codec failures, and the
//! caller-facing `BridgeError`, a tagged error that lets JavaScript branch on
//! `code` instead of matching message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Codec-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization or parse failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Line length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Stable error tags returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DeviceNotFound,
    PermissionRequired,
    PermissionDenied,
    PortNotOpen,
    PortAlreadyOpen,
    ConnectionFailed,
    OpenFailed,
    TransferFailed,
    UsbError,
    InvalidRequest,
    Internal,
}

/// Error taxonomy the codes fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Device absent from the current catalog snapshot
    NotFound,
    /// Access required or denied
    Permission,
    /// Operation invalid for the current session state
    State,
    /// OS-level I/O failure during a transfer
    Transfer,
    /// Could not obtain a connection, interface or endpoint
    Connection,
    /// Bridge or host failure outside the device taxonomy
    Internal,
}

impl ErrorCode {
    /// Wire tag for this code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DeviceNotFound => "device_not_found",
            ErrorCode::PermissionRequired => "permission_required",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::PortNotOpen => "port_not_open",
            ErrorCode::PortAlreadyOpen => "port_already_open",
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::OpenFailed => "open_failed",
            ErrorCode::TransferFailed => "transfer_failed",
            ErrorCode::UsbError => "usb_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::DeviceNotFound => ErrorCategory::NotFound,
            ErrorCode::PermissionRequired | ErrorCode::PermissionDenied => {
                ErrorCategory::Permission
            }
            ErrorCode::PortNotOpen | ErrorCode::PortAlreadyOpen => ErrorCategory::State,
            ErrorCode::TransferFailed => ErrorCategory::Transfer,
            ErrorCode::ConnectionFailed | ErrorCode::OpenFailed => ErrorCategory::Connection,
            ErrorCode::UsbError | ErrorCode::InvalidRequest | ErrorCode::Internal => {
                ErrorCategory::Internal
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error delivered to the bridge caller
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}
