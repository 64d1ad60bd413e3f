//! Adapter Facade
//!
//! `SerialPortModule` is the callable surface the bridge registers: one async
//! method per operation. It is the only place internal errors become
//! [`BridgeError`]s, so nothing platform-specific reaches the caller.

use crate::error::{HostError, LookupError, PermissionError, SessionError};
use crate::usb::backend::UsbHost;
use crate::usb::channel::{UsbBridge, UsbCommand, create_usb_bridge};
use crate::usb::worker::{WorkerSettings, spawn_usb_worker};
use protocol::{
    BridgeCall, BridgeError, DeviceDescriptor, DeviceId, DeviceRef, ErrorCode, LineOverrides,
    Payload, PermissionState, ReplyValue, SessionStatus,
};
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub const PORT_OPENED: &str = "Port opened successfully";
pub const DATA_WRITTEN: &str = "Data written successfully";
pub const PORT_CLOSED: &str = "Port closed successfully";

impl From<HostError> for BridgeError {
    fn from(err: HostError) -> Self {
        BridgeError::new(ErrorCode::UsbError, err.to_string())
    }
}

impl From<LookupError> for BridgeError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::DeviceNotFound(device) => BridgeError::new(
                ErrorCode::DeviceNotFound,
                format!("Device not found: {}", device),
            ),
            LookupError::Host(e) => e.into(),
        }
    }
}

impl From<PermissionError> for BridgeError {
    fn from(err: PermissionError) -> Self {
        let message = err.to_string();
        match err {
            PermissionError::Lookup(e) => e.into(),
            PermissionError::Host(e) => e.into(),
            PermissionError::Required { .. } => {
                BridgeError::new(ErrorCode::PermissionRequired, message)
            }
            PermissionError::Denied { .. } => BridgeError::new(ErrorCode::PermissionDenied, message),
            PermissionError::Abandoned { .. } => BridgeError::internal(message),
        }
    }
}

impl From<SessionError> for BridgeError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        let code = match err {
            SessionError::Lookup(e) => return e.into(),
            // openPort callers branch on permission_denied for a missing grant
            SessionError::PermissionRequired { device_id } => {
                return BridgeError::new(
                    ErrorCode::PermissionDenied,
                    format!("Permission denied for device {}", device_id),
                );
            }
            SessionError::AlreadyOpen { .. } => ErrorCode::PortAlreadyOpen,
            SessionError::PortNotOpen => ErrorCode::PortNotOpen,
            SessionError::Connection(_) => ErrorCode::ConnectionFailed,
            SessionError::OpenFailed(_) => ErrorCode::OpenFailed,
            SessionError::TransferFailed { .. } => ErrorCode::TransferFailed,
        };
        BridgeError::new(code, message)
    }
}

fn worker_gone(err: common::Error) -> BridgeError {
    BridgeError::internal(format!("USB worker unavailable: {}", err))
}

/// Bridge module exposing serial port operations
pub struct SerialPortModule {
    bridge: UsbBridge,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialPortModule {
    /// Start the USB worker for `host` and return the module
    pub fn start<H: UsbHost>(host: H, settings: WorkerSettings) -> common::Result<Self> {
        let (bridge, worker) = create_usb_bridge();
        let handle = spawn_usb_worker(host, worker, settings)?;
        info!("Serial port module started");

        Ok(Self {
            bridge,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::ListDevices { response })
            .await
            .map_err(worker_gone)??)
    }

    pub async fn has_permission(&self, device_id: DeviceId) -> Result<bool, BridgeError> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::HasPermission {
                device_id,
                response,
            })
            .await
            .map_err(worker_gone)??)
    }

    pub async fn permission_state(
        &self,
        device_id: DeviceId,
    ) -> Result<PermissionState, BridgeError> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::PermissionState {
                device_id,
                response,
            })
            .await
            .map_err(worker_gone)??)
    }

    /// Prompt for access and wait for the matching OS notification
    ///
    /// Dropping the returned future cancels the request.
    pub async fn request_permission(&self, device: DeviceRef) -> Result<(), BridgeError> {
        let ticket = self
            .bridge
            .request(|response| UsbCommand::RequestPermission { device, response })
            .await
            .map_err(worker_gone)??;
        Ok(ticket.wait().await?)
    }

    pub async fn get_serial_number(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<String>, BridgeError> {
        Ok(self
            .bridge
            .request(|response| UsbCommand::SerialNumber {
                device_id,
                response,
            })
            .await
            .map_err(worker_gone)??)
    }

    pub async fn open_port(
        &self,
        port: DeviceRef,
        line: LineOverrides,
    ) -> Result<String, BridgeError> {
        self.bridge
            .request(|response| UsbCommand::OpenPort {
                port,
                line,
                response,
            })
            .await
            .map_err(worker_gone)??;
        Ok(PORT_OPENED.to_string())
    }

    pub async fn write_data(&self, data: Payload) -> Result<String, BridgeError> {
        let data = data.into_bytes();
        self.bridge
            .request(|response| UsbCommand::Write { data, response })
            .await
            .map_err(worker_gone)??;
        Ok(DATA_WRITTEN.to_string())
    }

    pub async fn close_port(&self) -> Result<String, BridgeError> {
        self.bridge
            .request(|response| UsbCommand::ClosePort { response })
            .await
            .map_err(worker_gone)??;
        Ok(PORT_CLOSED.to_string())
    }

    pub async fn session_status(&self) -> Result<SessionStatus, BridgeError> {
        self.bridge
            .request(|response| UsbCommand::SessionStatus { response })
            .await
            .map_err(worker_gone)
    }

    /// Route a decoded bridge call to its operation
    pub async fn dispatch(&self, call: BridgeCall) -> Result<ReplyValue, BridgeError> {
        debug!("Dispatching {}", call.name());
        match call {
            BridgeCall::ListDevices => self.list_devices().await.map(ReplyValue::Devices),
            BridgeCall::HasPermission { device_id } => {
                self.has_permission(device_id).await.map(ReplyValue::Bool)
            }
            BridgeCall::PermissionState { device_id } => self
                .permission_state(device_id)
                .await
                .map(ReplyValue::Permission),
            BridgeCall::RequestPermission { device } => self
                .request_permission(device)
                .await
                .map(|()| ReplyValue::Unit),
            BridgeCall::SerialNumber { device_id } => self
                .get_serial_number(device_id)
                .await
                .map(ReplyValue::SerialNumber),
            BridgeCall::OpenPort { port_name, line } => {
                self.open_port(port_name, line).await.map(ReplyValue::Text)
            }
            BridgeCall::WriteData { data } => self.write_data(data).await.map(ReplyValue::Text),
            BridgeCall::ClosePort => self.close_port().await.map(ReplyValue::Text),
            BridgeCall::SessionStatus => self.session_status().await.map(ReplyValue::Status),
        }
    }

    /// Stop the worker, closing any open session
    pub async fn shutdown(&self) {
        if let Err(e) = self.bridge.send_command(UsbCommand::Shutdown).await {
            debug!("USB worker already stopped: {}", e);
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => info!("USB worker stopped"),
                Ok(Err(_)) => warn!("USB worker thread panicked"),
                Err(e) => warn!("Failed to join USB worker: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ErrorCategory;

    #[test]
    fn test_session_error_codes() {
        let cases = [
            (SessionError::PortNotOpen, ErrorCode::PortNotOpen),
            (
                SessionError::AlreadyOpen {
                    device_id: DeviceId(5),
                },
                ErrorCode::PortAlreadyOpen,
            ),
            (
                SessionError::Connection("Interface and Endpoint Error".to_string()),
                ErrorCode::ConnectionFailed,
            ),
            (
                SessionError::TransferFailed {
                    endpoint: 1,
                    source: HostError::Pipe,
                },
                ErrorCode::TransferFailed,
            ),
            (
                SessionError::Lookup(LookupError::DeviceNotFound(DeviceRef::Id(DeviceId(5)))),
                ErrorCode::DeviceNotFound,
            ),
            (
                SessionError::PermissionRequired {
                    device_id: DeviceId(5),
                },
                ErrorCode::PermissionDenied,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(BridgeError::from(err).code, code);
        }
    }

    #[test]
    fn test_connection_error_keeps_message() {
        let err = BridgeError::from(SessionError::Connection(
            "Interface and Endpoint Error".to_string(),
        ));
        assert_eq!(err.message, "Interface and Endpoint Error");
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_permission_error_codes() {
        let denied = BridgeError::from(PermissionError::Denied {
            device_id: DeviceId(5),
        });
        assert_eq!(denied.code, ErrorCode::PermissionDenied);

        let missing = BridgeError::from(PermissionError::Lookup(LookupError::DeviceNotFound(
            DeviceRef::Id(DeviceId(9)),
        )));
        assert_eq!(missing.code, ErrorCode::DeviceNotFound);

        let host = BridgeError::from(PermissionError::Host(HostError::Io));
        assert_eq!(host.code, ErrorCode::UsbError);
    }
}
