//! Session Manager
//!
//! Owns the single device connection. A [`Session`] value exists only while
//! the port is open: `open` builds it, `close` consumes it, and nothing else
//! holds the connection or its interface and endpoint handles.

use crate::error::{HostError, SessionError};
use crate::usb::backend::{EndpointDescriptor, UsbConnection, UsbHost};
use crate::usb::catalog::DeviceCatalog;
use crate::usb::profile::{AfterWrite, DeviceProfile, SerialDriver};
use protocol::{DeviceDescriptor, DeviceRef, LineOverrides, LineSettings, SessionStatus};
use tracing::{debug, info, warn};

const CDC_REQUEST_TYPE: u8 = 0x21;
const CDC_SET_LINE_CODING: u8 = 0x20;
const CDC_SET_CONTROL_LINE_STATE: u8 = 0x22;
const CDC_DTR_RTS: u16 = 0x03;

/// Message for a missing interface or endpoint at open time
pub const INTERFACE_ENDPOINT_ERROR: &str = "Interface and Endpoint Error";

/// The live connection and everything derived from it
pub struct Session<C> {
    device: DeviceDescriptor,
    connection: C,
    /// Interface numbers in claim order
    claimed: Vec<u8>,
    interface_number: u8,
    endpoint: EndpointDescriptor,
    line: LineSettings,
}

impl<C: UsbConnection> Session<C> {
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    fn status(&self) -> SessionStatus {
        SessionStatus::Open {
            device_id: self.device.device_id,
            device_name: self.device.device_name.clone(),
            interface_number: self.interface_number,
            endpoint_address: self.endpoint.address,
            line: self.line,
        }
    }

    fn transfer(&mut self, data: &[u8], profile: &DeviceProfile) -> Result<(), SessionError> {
        let written = self
            .connection
            .bulk_transfer(&self.endpoint, data, profile.transfer_timeout)
            .map_err(|source| SessionError::TransferFailed {
                endpoint: self.endpoint.address,
                source,
            })?;
        if written < data.len() {
            warn!(
                "Short bulk write on endpoint {:#04x}: {} of {} bytes",
                self.endpoint.address,
                written,
                data.len()
            );
        }
        Ok(())
    }

    /// Release every claimed interface, then close; release errors are logged
    fn teardown(mut self) {
        for number in self.claimed.drain(..).rev() {
            if let Err(e) = self.connection.release_interface(number) {
                warn!("Failed to release interface {}: {}", number, e);
            }
        }
        self.connection.close();
        debug!("Session with device {} torn down", self.device.device_id);
    }
}

/// `Closed` or `Open`; there is never more than one session
pub enum SessionState<C> {
    Closed,
    Open(Session<C>),
}

/// Lifecycle of the single device session
pub struct SessionManager<C> {
    state: SessionState<C>,
    profile: DeviceProfile,
}

impl<C: UsbConnection> SessionManager<C> {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            state: SessionState::Closed,
            profile,
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    pub fn session(&self) -> Option<&Session<C>> {
        match &self.state {
            SessionState::Open(session) => Some(session),
            SessionState::Closed => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match &self.state {
            SessionState::Open(session) => session.status(),
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    /// Resolve, check permission, connect, claim and configure
    ///
    /// Fails without side effects when a session is already open. Any later
    /// failure unwinds what was acquired so the state stays `Closed`.
    pub fn open<H>(
        &mut self,
        host: &mut H,
        catalog: &DeviceCatalog,
        selector: &DeviceRef,
        overrides: LineOverrides,
    ) -> Result<(), SessionError>
    where
        H: UsbHost<Connection = C>,
    {
        if let SessionState::Open(session) = &self.state {
            return Err(SessionError::AlreadyOpen {
                device_id: session.device.device_id,
            });
        }

        let device = catalog.resolve(host, selector, self.profile.lookup)?;
        if !host.has_permission(&device) {
            return Err(SessionError::PermissionRequired {
                device_id: device.device_id,
            });
        }

        let connection = host.open(&device).map_err(|e| match e {
            HostError::Access => SessionError::PermissionRequired {
                device_id: device.device_id,
            },
            other => SessionError::Connection(format!("Failed to open connection: {}", other)),
        })?;

        let line = overrides.apply(self.profile.line);
        let session = self.connect(device, connection, line)?;

        info!(
            "Opened session on device {} (interface {}, endpoint {:#04x})",
            session.device.device_id, session.interface_number, session.endpoint.address
        );
        self.state = SessionState::Open(session);
        Ok(())
    }

    fn connect(
        &self,
        device: DeviceDescriptor,
        mut connection: C,
        line: LineSettings,
    ) -> Result<Session<C>, SessionError> {
        let selected = connection
            .interface(self.profile.interface_index)
            .and_then(|interface| {
                self.profile
                    .endpoint
                    .select(&interface)
                    .map(|endpoint| (interface.number, endpoint))
            });
        let Some((interface_number, endpoint)) = selected else {
            connection.close();
            return Err(SessionError::Connection(INTERFACE_ENDPOINT_ERROR.to_string()));
        };

        if let Err(e) = connection.claim_interface(interface_number) {
            connection.close();
            return Err(SessionError::Connection(format!(
                "Failed to claim interface {}: {}",
                interface_number, e
            )));
        }

        let mut session = Session {
            device,
            connection,
            claimed: vec![interface_number],
            interface_number,
            endpoint,
            line,
        };

        if self.profile.driver == SerialDriver::CdcAcm {
            if let Err(e) = self.configure_cdc(&mut session) {
                session.teardown();
                return Err(e);
            }
        }

        Ok(session)
    }

    fn configure_cdc(&self, session: &mut Session<C>) -> Result<(), SessionError> {
        let control = session
            .connection
            .interface(self.profile.control_interface)
            .ok_or_else(|| {
                SessionError::OpenFailed(format!(
                    "no control interface at index {}",
                    self.profile.control_interface
                ))
            })?;

        if !session.claimed.contains(&control.number) {
            session
                .connection
                .claim_interface(control.number)
                .map_err(|e| {
                    SessionError::OpenFailed(format!(
                        "failed to claim control interface {}: {}",
                        control.number, e
                    ))
                })?;
            session.claimed.push(control.number);
        }

        let timeout = self.profile.transfer_timeout;
        let index = u16::from(control.number);
        session
            .connection
            .control_out(
                CDC_REQUEST_TYPE,
                CDC_SET_LINE_CODING,
                0,
                index,
                &session.line.line_coding(),
                timeout,
            )
            .map_err(|e| SessionError::OpenFailed(format!("SET_LINE_CODING failed: {}", e)))?;
        session
            .connection
            .control_out(
                CDC_REQUEST_TYPE,
                CDC_SET_CONTROL_LINE_STATE,
                CDC_DTR_RTS,
                index,
                &[],
                timeout,
            )
            .map_err(|e| {
                SessionError::OpenFailed(format!("SET_CONTROL_LINE_STATE failed: {}", e))
            })?;

        debug!(
            "Configured CDC line: {} baud, {:?} data bits",
            session.line.baud_rate, session.line.data_bits
        );
        Ok(())
    }

    /// Bulk-write `data`, then the profile's post-write bytes
    ///
    /// Under `AfterWrite::Close` the session is released afterwards whether
    /// or not the transfer succeeded.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let SessionState::Open(session) = &mut self.state else {
            return Err(SessionError::PortNotOpen);
        };

        let mut result = session.transfer(data, &self.profile);
        if result.is_ok() && !self.profile.post_write.is_empty() {
            result = session.transfer(&self.profile.post_write, &self.profile);
        }

        match &result {
            Ok(()) => debug!(
                "Wrote {} bytes to device {}",
                data.len(),
                session.device.device_id
            ),
            Err(e) => warn!("Write to device {} failed: {}", session.device.device_id, e),
        }

        if self.profile.after_write == AfterWrite::Close {
            if let SessionState::Open(session) =
                std::mem::replace(&mut self.state, SessionState::Closed)
            {
                info!(
                    "Releasing device {} after write",
                    session.device.device_id
                );
                session.teardown();
            }
        }

        result
    }

    /// Release the interface and close the connection
    pub fn close(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Open(session) => {
                info!("Closing session on device {}", session.device.device_id);
                session.teardown();
                Ok(())
            }
            SessionState::Closed => Err(SessionError::PortNotOpen),
        }
    }
}
