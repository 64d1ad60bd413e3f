//! USB worker thread
//!
//! Dedicated thread that owns the host backend, catalog, permission broker
//! and session. It alternates between draining commands from the Tokio
//! runtime and pumping the OS event loop, which is where permission
//! notifications come from.

use crate::error::{HostError, LookupError, PermissionError};
use crate::usb::backend::UsbHost;
use crate::usb::catalog::DeviceCatalog;
use crate::usb::channel::{UsbCommand, UsbWorker};
use crate::usb::permission::PermissionBroker;
use crate::usb::profile::DeviceProfile;
use crate::usb::session::SessionManager;
use protocol::{DeviceDescriptor, DeviceId, DeviceRef};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default interval for `UsbHost::poll_events`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker construction parameters
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub filters: Vec<String>,
    pub profile: DeviceProfile,
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            profile: DeviceProfile::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// USB worker thread state
pub struct UsbWorkerThread<H: UsbHost> {
    host: H,
    catalog: DeviceCatalog,
    broker: PermissionBroker,
    sessions: SessionManager<H::Connection>,
    worker: UsbWorker,
    poll_interval: Duration,
}

impl<H: UsbHost> UsbWorkerThread<H> {
    pub fn new(host: H, worker: UsbWorker, settings: WorkerSettings) -> Self {
        Self {
            host,
            catalog: DeviceCatalog::new(settings.filters),
            broker: PermissionBroker::new(),
            sessions: SessionManager::new(settings.profile),
            worker,
            poll_interval: settings.poll_interval,
        }
    }

    /// Run until `Shutdown` arrives or every bridge handle is dropped
    pub fn run(mut self) {
        info!("USB worker thread started");

        'outer: loop {
            while let Some(cmd) = self.worker.try_recv_command() {
                if let UsbCommand::Shutdown = cmd {
                    info!("USB worker shutting down");
                    break 'outer;
                }
                self.handle_command(cmd);
            }

            if self.worker.is_closed() {
                info!("Command channel closed, USB worker exiting");
                break;
            }

            for event in self.host.poll_events(self.poll_interval) {
                self.broker.deliver(event);
            }
        }

        if self.sessions.is_open() {
            let _ = self.sessions.close();
        }
        info!("USB worker thread stopped");
    }

    /// Handle a command, surviving panics in the handler
    fn handle_command(&mut self, cmd: UsbCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        // The response sender was dropped while unwinding, so the caller sees
        // a channel error rather than hanging
        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListDevices { response } => {
                let result = self
                    .catalog
                    .snapshot(&mut self.host)
                    .map(|snapshot| snapshot.into_devices());
                if let Ok(devices) = &result {
                    debug!("Listing {} devices", devices.len());
                }
                let _ = response.send(result);
            }

            UsbCommand::HasPermission {
                device_id,
                response,
            } => {
                let result = self
                    .resolve_id(device_id)
                    .map(|device| self.host.has_permission(&device));
                let _ = response.send(result);
            }

            UsbCommand::PermissionState {
                device_id,
                response,
            } => {
                let result = self
                    .resolve_id(device_id)
                    .map(|device| self.broker.state(&self.host, &device));
                let _ = response.send(result);
            }

            UsbCommand::RequestPermission { device, response } => {
                debug!("Requesting permission for {}", device);
                let result = self
                    .catalog
                    .resolve(&mut self.host, &device, self.sessions.profile().lookup)
                    .map_err(PermissionError::from)
                    .and_then(|device| self.broker.request(&mut self.host, &device));
                // A ticket bounced back here is dropped, which cancels it
                let _ = response.send(result);
            }

            UsbCommand::SerialNumber {
                device_id,
                response,
            } => {
                let result = self.serial_number(device_id);
                let _ = response.send(result);
            }

            UsbCommand::OpenPort {
                port,
                line,
                response,
            } => {
                debug!("Opening port {}", port);
                let result = self
                    .sessions
                    .open(&mut self.host, &self.catalog, &port, line);
                let _ = response.send(result);
            }

            UsbCommand::Write { data, response } => {
                let result = self.sessions.write(&data);
                let _ = response.send(result);
            }

            UsbCommand::ClosePort { response } => {
                let result = self.sessions.close();
                let _ = response.send(result);
            }

            UsbCommand::SessionStatus { response } => {
                let _ = response.send(self.sessions.status());
            }

            UsbCommand::Shutdown => {
                // Handled in the run loop
            }
        }
    }

    fn resolve_id(&mut self, device_id: DeviceId) -> Result<DeviceDescriptor, LookupError> {
        self.catalog.resolve(
            &mut self.host,
            &DeviceRef::Id(device_id),
            self.sessions.profile().lookup,
        )
    }

    fn serial_number(&mut self, device_id: DeviceId) -> Result<Option<String>, PermissionError> {
        let device = self.resolve_id(device_id)?;
        if !self.host.has_permission(&device) {
            return Err(PermissionError::Required { device_id });
        }

        self.host.serial_number(&device).map_err(|e| match e {
            HostError::Access => PermissionError::Required { device_id },
            other => PermissionError::Host(other),
        })
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until a Shutdown command is received or the last
/// [`UsbBridge`](crate::usb::channel::UsbBridge) is dropped.
pub fn spawn_usb_worker<H: UsbHost>(
    host: H,
    worker: UsbWorker,
    settings: WorkerSettings,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || UsbWorkerThread::new(host, worker, settings).run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::channel::create_usb_bridge;
    use crate::usb::mock::{MockDevice, MockUsbHost};
    use protocol::SessionStatus;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(5),
            ..WorkerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_worker_lists_devices() {
        let (host, controller) = MockUsbHost::new();
        controller.attach(MockDevice::printer(1005, "POS-80"));
        let (bridge, worker) = create_usb_bridge();
        let handle = spawn_usb_worker(host, worker, settings()).unwrap();

        let devices = bridge
            .request(|response| UsbCommand::ListDevices { response })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].product_name.as_deref(), Some("POS-80"));

        bridge.send_command(UsbCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_worker_closes_session_on_shutdown() {
        let (host, controller) = MockUsbHost::new();
        controller.attach(MockDevice::printer(1005, "POS-80").with_permission(true));
        let (bridge, worker) = create_usb_bridge();
        let handle = spawn_usb_worker(host, worker, settings()).unwrap();

        bridge
            .request(|response| UsbCommand::OpenPort {
                port: DeviceRef::Id(DeviceId(1005)),
                line: Default::default(),
                response,
            })
            .await
            .unwrap()
            .unwrap();
        let status = bridge
            .request(|response| UsbCommand::SessionStatus { response })
            .await
            .unwrap();
        assert!(matches!(status, SessionStatus::Open { .. }));

        drop(bridge);
        handle.join().unwrap();
        assert_eq!(controller.open_connections(), 0);
        assert!(controller.claimed_interfaces().is_empty());
    }
}
