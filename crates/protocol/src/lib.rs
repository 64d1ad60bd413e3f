//! Protocol library for usb-serial-bridge
//!
//! This crate defines the values and messages exchanged between the
//! JavaScript bridge and the USB serial host: device descriptors, line
//! settings, permission and session state, the tagged error taxonomy, and a
//! line-delimited JSON codec.
//!
//! # Example
//!
//! ```
//! use protocol::{BridgeCall, decode_request};
//!
//! let request = decode_request(br#"{"id":1,"op":"hasPermissionAsync","args":{"deviceId":5}}"#).unwrap();
//! let call = request.call().unwrap();
//! assert_eq!(call.name(), "hasPermissionAsync");
//! ```
//!
//! # Errors
//!
//! Every failed operation is reported as a [`BridgeError`] whose `code`
//! serializes to a stable snake_case tag:
//!
//! ```
//! use protocol::{BridgeError, ErrorCode};
//!
//! let err = BridgeError::new(ErrorCode::PortNotOpen, "Serial port is not open");
//! assert_eq!(serde_json::to_value(&err).unwrap()["code"], "port_not_open");
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{MAX_FRAME_SIZE, decode_request, encode_reply, read_request, write_reply};

#[cfg(feature = "async")]
pub use codec::{read_line_async, write_reply_async};
pub use error::{BridgeError, ErrorCategory, ErrorCode, ProtocolError, Result};
pub use messages::{BridgeCall, BridgeReply, BridgeRequest, OPERATIONS, ReplyValue};
pub use types::{
    DataBits, DeviceDescriptor, DeviceId, DeviceRef, FlowControl, LineOverrides, LineSettings,
    Parity, PermissionState, Payload, SessionStatus, StopBits,
};
