//! Async channel bridge between the Tokio runtime and the USB thread

use crate::error::{HostError, LookupError, PermissionError, SessionError};
use crate::usb::permission::PermissionTicket;
use async_channel::{Receiver, Sender, bounded};
use common::{Error, Result};
use protocol::{
    DeviceDescriptor, DeviceId, DeviceRef, LineOverrides, PermissionState, SessionStatus,
};
use tokio::sync::oneshot;

/// Commands from the Tokio runtime to the USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// Enumerate attached devices
    ListDevices {
        response: oneshot::Sender<std::result::Result<Vec<DeviceDescriptor>, HostError>>,
    },

    /// Query the OS grant for one device
    HasPermission {
        device_id: DeviceId,
        response: oneshot::Sender<std::result::Result<bool, LookupError>>,
    },

    /// Broker view of one device's permission
    PermissionState {
        device_id: DeviceId,
        response: oneshot::Sender<std::result::Result<PermissionState, LookupError>>,
    },

    /// Issue a permission request; the caller waits on the returned ticket
    RequestPermission {
        device: DeviceRef,
        response: oneshot::Sender<std::result::Result<PermissionTicket, PermissionError>>,
    },

    /// Read the serial number string descriptor
    SerialNumber {
        device_id: DeviceId,
        response: oneshot::Sender<std::result::Result<Option<String>, PermissionError>>,
    },

    /// Open the single session
    OpenPort {
        port: DeviceRef,
        line: LineOverrides,
        response: oneshot::Sender<std::result::Result<(), SessionError>>,
    },

    /// Bulk-write to the open session
    Write {
        data: Vec<u8>,
        response: oneshot::Sender<std::result::Result<(), SessionError>>,
    },

    /// Close the open session
    ClosePort {
        response: oneshot::Sender<std::result::Result<(), SessionError>>,
    },

    /// Report the session state
    SessionStatus {
        response: oneshot::Sender<SessionStatus>,
    },

    /// Close any open session and stop the USB thread
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh response channel and await the answer
    pub async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> UsbCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await
            .map_err(|_| Error::Channel("USB worker dropped the response".to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    cmd_rx: Receiver<UsbCommand>,
}

impl UsbWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every bridge handle is gone
    pub fn is_closed(&self) -> bool {
        self.cmd_rx.is_closed()
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    (UsbBridge { cmd_tx }, UsbWorker { cmd_rx })
}
