//! Bridge message definitions
//!
//! The JavaScript bridge registers each operation under a stable name and
//! forwards its arguments unchanged. On the wire a request is
//! `{"id": 1, "op": "openPort", "args": {...}}` and the matching reply is
//! either `{"id": 1, "ok": <value>}` or
//! `{"id": 1, "error": {"code": "...", "message": "..."}}`.

use crate::error::{BridgeError, ErrorCode};
use crate::types::{
    DeviceDescriptor, DeviceId, DeviceRef, LineOverrides, Payload, PermissionState, SessionStatus,
};
use serde::{Deserialize, Serialize};

/// Stable operation names, in registration order
pub const OPERATIONS: [&str; 9] = [
    "listDevices",
    "hasPermissionAsync",
    "getPermissionStateAsync",
    "requestPermissionAsync",
    "getSerialNumberAsync",
    "openPort",
    "writeData",
    "closePort",
    "getSessionStatus",
];

/// Request as it arrives from the bridge, before the operation is decoded
///
/// Kept loose so that a request with a bad `op` or bad `args` can still be
/// answered under its own `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    #[serde(default)]
    pub id: Option<u64>,
    pub op: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl BridgeRequest {
    pub fn new(id: u64, call: &BridgeCall) -> Self {
        // BridgeCall always serializes to {"op": ..., "args"?: ...}
        let mut value = serde_json::to_value(call).unwrap_or_default();
        let args = value
            .get_mut("args")
            .map(serde_json::Value::take)
            .unwrap_or_default();

        Self {
            id: Some(id),
            op: call.name().to_string(),
            args,
        }
    }

    /// Decode `op` + `args` into a typed call
    ///
    /// Missing, `null`, `{}` and `[]` args all mean "no arguments".
    pub fn call(&self) -> Result<BridgeCall, BridgeError> {
        let mut envelope = serde_json::Map::new();
        envelope.insert("op".to_string(), serde_json::Value::String(self.op.clone()));
        if !self.has_no_args() {
            envelope.insert("args".to_string(), self.args.clone());
        }

        serde_json::from_value(serde_json::Value::Object(envelope)).map_err(|e| {
            BridgeError::new(
                ErrorCode::InvalidRequest,
                format!("Invalid request for '{}': {}", self.op, e),
            )
        })
    }

    fn has_no_args(&self) -> bool {
        match &self.args {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

/// Every operation the bridge can invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum BridgeCall {
    /// Enumerate attached devices
    #[serde(rename = "listDevices")]
    ListDevices,

    /// Ask the OS whether access is already granted
    #[serde(rename = "hasPermissionAsync", rename_all = "camelCase")]
    HasPermission { device_id: DeviceId },

    /// Report the broker's view of a device's permission
    #[serde(rename = "getPermissionStateAsync", rename_all = "camelCase")]
    PermissionState { device_id: DeviceId },

    /// Prompt for access and wait for the OS answer
    #[serde(rename = "requestPermissionAsync", rename_all = "camelCase")]
    RequestPermission { device: DeviceRef },

    /// Read the serial number string descriptor
    #[serde(rename = "getSerialNumberAsync", rename_all = "camelCase")]
    SerialNumber { device_id: DeviceId },

    /// Open the single session
    #[serde(rename = "openPort", rename_all = "camelCase")]
    OpenPort {
        port_name: DeviceRef,
        #[serde(flatten)]
        line: LineOverrides,
    },

    /// Bulk-write to the open session
    #[serde(rename = "writeData")]
    WriteData { data: Payload },

    /// Close the open session
    #[serde(rename = "closePort")]
    ClosePort,

    /// Report whether a session is open
    #[serde(rename = "getSessionStatus")]
    SessionStatus,
}

impl BridgeCall {
    /// Registered operation name
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCall::ListDevices => OPERATIONS[0],
            BridgeCall::HasPermission { .. } => OPERATIONS[1],
            BridgeCall::PermissionState { .. } => OPERATIONS[2],
            BridgeCall::RequestPermission { .. } => OPERATIONS[3],
            BridgeCall::SerialNumber { .. } => OPERATIONS[4],
            BridgeCall::OpenPort { .. } => OPERATIONS[5],
            BridgeCall::WriteData { .. } => OPERATIONS[6],
            BridgeCall::ClosePort => OPERATIONS[7],
            BridgeCall::SessionStatus => OPERATIONS[8],
        }
    }
}

/// Successful result of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyValue {
    Unit,
    Bool(bool),
    Devices(Vec<DeviceDescriptor>),
    Text(String),
    SerialNumber(Option<String>),
    Permission(PermissionState),
    Status(SessionStatus),
}

/// Reply sent back over the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeReply {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<ReplyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BridgeError>,
}

impl BridgeReply {
    pub fn ok(id: Option<u64>, value: ReplyValue) -> Self {
        Self {
            id,
            ok: Some(value),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, error: BridgeError) -> Self {
        Self {
            id,
            ok: None,
            error: Some(error),
        }
    }

    pub fn from_result(id: Option<u64>, result: Result<ReplyValue, BridgeError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(error) => Self::error(id, error),
        }
    }
}
