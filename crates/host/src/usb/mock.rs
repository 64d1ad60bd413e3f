//! In-memory USB host
//!
//! `MockUsbHost` implements the backend traits over shared state that a
//! [`MockController`] manipulates from the outside: attach and detach
//! devices, answer permission prompts, inject failures, and inspect what
//! reached the "wire". It drives the test-suite and the `--simulate` mode.

use crate::error::HostError;
use crate::usb::backend::{
    EndpointDescriptor, InterfaceDescriptor, PermissionEvent, PermissionToken, PromptStatus,
    UsbConnection, UsbHost,
};
use common::test_utils::{create_mock_printer, create_mock_serial_adapter};
use protocol::{DeviceDescriptor, DeviceId};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// How the simulated OS answers `request_permission`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptPolicy {
    /// Show a prompt and wait for `grant`/`deny`
    #[default]
    Prompt,
    /// Answer immediately with the current grant state
    Suppressed,
    /// Show a prompt that the "user" accepts at once
    AutoGrant,
}

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Enumerate,
    Open,
    Claim,
    Release,
    Transfer,
    Control,
}

/// Simulated attached device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub descriptor: DeviceDescriptor,
    pub serial_number: Option<String>,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub permitted: bool,
}

impl MockDevice {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            serial_number: None,
            interfaces: Vec::new(),
            permitted: false,
        }
    }

    /// ESC/POS style receipt printer: one printer-class interface with a
    /// bulk OUT endpoint first and a bulk IN status endpoint second
    pub fn printer(device_id: u32, product_name: &str) -> Self {
        Self::new(create_mock_printer(device_id, product_name)).with_interface(
            InterfaceDescriptor {
                number: 0,
                class: 7,
                endpoints: vec![
                    EndpointDescriptor::bulk_out(0x01, 64),
                    EndpointDescriptor::bulk_in(0x02, 64),
                ],
            },
        )
    }

    /// CDC ACM adapter: communication interface 0 with an interrupt
    /// endpoint, data interface 1 listing bulk IN before bulk OUT
    pub fn cdc_serial(device_id: u32) -> Self {
        Self::new(create_mock_serial_adapter(device_id))
            .with_interface(InterfaceDescriptor {
                number: 0,
                class: 2,
                endpoints: vec![EndpointDescriptor::interrupt_in(0x03, 8)],
            })
            .with_interface(InterfaceDescriptor {
                number: 1,
                class: 10,
                endpoints: vec![
                    EndpointDescriptor::bulk_in(0x02, 64),
                    EndpointDescriptor::bulk_out(0x01, 64),
                ],
            })
    }

    pub fn with_interface(mut self, interface: InterfaceDescriptor) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn without_interfaces(mut self) -> Self {
        self.interfaces.clear();
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    pub fn with_permission(mut self, permitted: bool) -> Self {
        self.permitted = permitted;
        self
    }
}

/// Bytes that reached a bulk OUT endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWrite {
    pub device_id: DeviceId,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

/// A class or vendor control request that reached a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    policy: PromptPolicy,
    prompts: Vec<(PermissionToken, DeviceId)>,
    prompt_count: usize,
    open_connections: usize,
    claimed: Vec<(DeviceId, u8)>,
    writes: Vec<BulkWrite>,
    control: Vec<ControlRequest>,
    failures: HashMap<FailPoint, HostError>,
}

impl MockState {
    fn device(&self, id: DeviceId) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.descriptor.device_id == id)
    }

    fn device_mut(&mut self, id: DeviceId) -> Option<&mut MockDevice> {
        self.devices.iter_mut().find(|d| d.descriptor.device_id == id)
    }

    fn check(&self, point: FailPoint) -> Result<(), HostError> {
        match self.failures.get(&point) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated OS USB manager
pub struct MockUsbHost {
    state: Shared,
    events: Receiver<PermissionEvent>,
    events_tx: Sender<PermissionEvent>,
}

impl MockUsbHost {
    /// Create an empty host and the controller that drives it
    pub fn new() -> (Self, MockController) {
        let state = Shared::default();
        let (events_tx, events) = mpsc::channel();
        let controller = MockController {
            state: state.clone(),
            events: events_tx.clone(),
        };

        (
            Self {
                state,
                events,
                events_tx,
            },
            controller,
        )
    }

    /// Host pre-populated with the `--simulate` receipt printer
    pub fn simulated() -> (Self, MockController) {
        let (host, controller) = Self::new();
        controller.attach(MockDevice::printer(1005, "POS-80").with_serial("SIM-POS80-0001"));
        controller.set_prompt_policy(PromptPolicy::AutoGrant);
        (host, controller)
    }
}

impl UsbHost for MockUsbHost {
    type Connection = MockConnection;

    fn devices(&mut self) -> Result<Vec<DeviceDescriptor>, HostError> {
        let state = lock(&self.state);
        state.check(FailPoint::Enumerate)?;
        Ok(state.devices.iter().map(|d| d.descriptor.clone()).collect())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        lock(&self.state)
            .device(device.device_id)
            .is_some_and(|d| d.permitted)
    }

    fn request_permission(
        &mut self,
        device: &DeviceDescriptor,
        token: PermissionToken,
    ) -> Result<PromptStatus, HostError> {
        let mut state = lock(&self.state);
        let id = device.device_id;
        let Some(permitted) = state.device(id).map(|d| d.permitted) else {
            return Err(HostError::NoDevice);
        };

        match state.policy {
            PromptPolicy::Suppressed => Ok(PromptStatus::Decided(permitted)),
            PromptPolicy::Prompt => {
                state.prompt_count += 1;
                state.prompts.push((token, id));
                Ok(PromptStatus::Prompted)
            }
            PromptPolicy::AutoGrant => {
                state.prompt_count += 1;
                if let Some(device) = state.device_mut(id) {
                    device.permitted = true;
                }
                let _ = self.events_tx.send(PermissionEvent {
                    token,
                    device_id: id,
                    granted: true,
                });
                Ok(PromptStatus::Prompted)
            }
        }
    }

    fn serial_number(&mut self, device: &DeviceDescriptor) -> Result<Option<String>, HostError> {
        let state = lock(&self.state);
        let mock = state.device(device.device_id).ok_or(HostError::NoDevice)?;
        if !mock.permitted {
            return Err(HostError::Access);
        }
        Ok(mock.serial_number.clone())
    }

    fn open(&mut self, device: &DeviceDescriptor) -> Result<MockConnection, HostError> {
        let mut state = lock(&self.state);
        state.check(FailPoint::Open)?;
        let mock = state.device(device.device_id).ok_or(HostError::NoDevice)?;
        if !mock.permitted {
            return Err(HostError::Access);
        }

        let interfaces = mock.interfaces.clone();
        state.open_connections += 1;
        debug!("Mock connection opened to device {}", device.device_id);

        Ok(MockConnection {
            state: self.state.clone(),
            device_id: device.device_id,
            interfaces,
        })
    }

    fn poll_events(&mut self, timeout: Duration) -> Vec<PermissionEvent> {
        let mut events = Vec::new();
        match self.events.recv_timeout(timeout) {
            Ok(event) => events.push(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return events,
        }
        events.extend(self.events.try_iter());
        events
    }
}

/// Connection to a simulated device
pub struct MockConnection {
    state: Shared,
    device_id: DeviceId,
    interfaces: Vec<InterfaceDescriptor>,
}

impl UsbConnection for MockConnection {
    fn interface(&self, index: u8) -> Option<InterfaceDescriptor> {
        self.interfaces.get(usize::from(index)).cloned()
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.check(FailPoint::Claim)?;
        if state.device(self.device_id).is_none() {
            return Err(HostError::NoDevice);
        }
        if state.claimed.contains(&(self.device_id, number)) {
            return Err(HostError::Busy);
        }
        state.claimed.push((self.device_id, number));
        Ok(())
    }

    fn release_interface(&mut self, number: u8) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        state.check(FailPoint::Release)?;
        let before = state.claimed.len();
        let device_id = self.device_id;
        state.claimed.retain(|&claim| claim != (device_id, number));
        if state.claimed.len() == before {
            return Err(HostError::NotFound);
        }
        Ok(())
    }

    fn bulk_transfer(
        &mut self,
        endpoint: &EndpointDescriptor,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, HostError> {
        let mut state = lock(&self.state);
        if state.device(self.device_id).is_none() {
            return Err(HostError::NoDevice);
        }
        state.check(FailPoint::Transfer)?;

        let owner = self
            .interfaces
            .iter()
            .find(|i| i.endpoints.iter().any(|e| e.address == endpoint.address))
            .ok_or(HostError::NotFound)?;
        if !state.claimed.contains(&(self.device_id, owner.number)) {
            return Err(HostError::NotFound);
        }

        state.writes.push(BulkWrite {
            device_id: self.device_id,
            endpoint: endpoint.address,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, HostError> {
        let mut state = lock(&self.state);
        if state.device(self.device_id).is_none() {
            return Err(HostError::NoDevice);
        }
        state.check(FailPoint::Control)?;
        state.control.push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn close(self) {
        let mut state = lock(&self.state);
        state.open_connections = state.open_connections.saturating_sub(1);
        debug!("Mock connection to device {} closed", self.device_id);
    }
}

/// Handle for driving a [`MockUsbHost`] from outside the worker thread
#[derive(Clone)]
pub struct MockController {
    state: Shared,
    events: Sender<PermissionEvent>,
}

impl MockController {
    pub fn attach(&self, device: MockDevice) {
        let mut state = lock(&self.state);
        let id = device.descriptor.device_id;
        state.devices.retain(|d| d.descriptor.device_id != id);
        state.devices.push(device);
    }

    pub fn detach(&self, device_id: DeviceId) {
        lock(&self.state)
            .devices
            .retain(|d| d.descriptor.device_id != device_id);
    }

    pub fn set_prompt_policy(&self, policy: PromptPolicy) {
        lock(&self.state).policy = policy;
    }

    /// Grant access and answer every outstanding prompt for the device
    pub fn grant(&self, device_id: DeviceId) {
        self.decide(device_id, true);
    }

    /// Refuse access and answer every outstanding prompt for the device
    pub fn deny(&self, device_id: DeviceId) {
        self.decide(device_id, false);
    }

    fn decide(&self, device_id: DeviceId, granted: bool) {
        let mut state = lock(&self.state);
        if let Some(device) = state.device_mut(device_id) {
            device.permitted = granted;
        }

        let (answered, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.prompts)
            .into_iter()
            .partition(|&(_, id)| id == device_id);
        state.prompts = rest;

        for (token, id) in answered {
            let _ = self.events.send(PermissionEvent {
                token,
                device_id: id,
                granted,
            });
        }
    }

    /// Deliver an arbitrary notification
    pub fn emit(&self, event: PermissionEvent) {
        let _ = self.events.send(event);
    }

    pub fn fail(&self, point: FailPoint, error: HostError) {
        lock(&self.state).failures.insert(point, error);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Tokens of prompts still waiting for an answer
    pub fn outstanding_prompts(&self) -> Vec<(PermissionToken, DeviceId)> {
        lock(&self.state).prompts.clone()
    }

    pub fn prompt_count(&self) -> usize {
        lock(&self.state).prompt_count
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.state).open_connections
    }

    pub fn claimed_interfaces(&self) -> Vec<(DeviceId, u8)> {
        lock(&self.state).claimed.clone()
    }

    pub fn writes(&self) -> Vec<BulkWrite> {
        lock(&self.state).writes.clone()
    }

    /// Concatenated payload bytes written to a device
    pub fn written_bytes(&self, device_id: DeviceId) -> Vec<u8> {
        lock(&self.state)
            .writes
            .iter()
            .filter(|w| w.device_id == device_id)
            .flat_map(|w| w.data.iter().copied())
            .collect()
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        lock(&self.state).control.clone()
    }
}
