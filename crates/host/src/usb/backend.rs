//! OS collaborator traits
//!
//! The USB subsystem is reached only through [`UsbHost`] and
//! [`UsbConnection`]. The rusb backend implements them on desktop hosts and
//! the mock backend implements them in memory.

use crate::error::HostError;
use protocol::{DeviceDescriptor, DeviceId};
use std::fmt;
use std::time::Duration;

/// Endpoint direction (bit 7 of the address)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of a USB interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn bulk_out(address: u8, max_packet_size: u16) -> Self {
        Self {
            address: address & 0x7F,
            direction: Direction::Out,
            kind: TransferKind::Bulk,
            max_packet_size,
        }
    }

    pub fn bulk_in(address: u8, max_packet_size: u16) -> Self {
        Self {
            address: address | 0x80,
            direction: Direction::In,
            kind: TransferKind::Bulk,
            max_packet_size,
        }
    }

    pub fn interrupt_in(address: u8, max_packet_size: u16) -> Self {
        Self {
            address: address | 0x80,
            direction: Direction::In,
            kind: TransferKind::Interrupt,
            max_packet_size,
        }
    }

    pub fn is_bulk_out(&self) -> bool {
        self.kind == TransferKind::Bulk && self.direction == Direction::Out
    }
}

/// One interface of the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Correlation id tying a permission prompt to its notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionToken(pub u64);

impl fmt::Display for PermissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Permission notification delivered by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionEvent {
    pub token: PermissionToken,
    pub device_id: DeviceId,
    pub granted: bool,
}

/// Outcome of asking the OS for access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStatus {
    /// A prompt is showing; a notification carrying the token follows
    Prompted,
    /// The OS answered without prompting
    Decided(bool),
}

/// Device enumeration, permission and open primitives
pub trait UsbHost: Send + 'static {
    type Connection: UsbConnection;

    /// Fresh snapshot of attached devices
    fn devices(&mut self) -> Result<Vec<DeviceDescriptor>, HostError>;

    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    fn request_permission(
        &mut self,
        device: &DeviceDescriptor,
        token: PermissionToken,
    ) -> Result<PromptStatus, HostError>;

    fn serial_number(&mut self, device: &DeviceDescriptor) -> Result<Option<String>, HostError>;

    fn open(&mut self, device: &DeviceDescriptor) -> Result<Self::Connection, HostError>;

    /// Pump the OS event loop for up to `timeout`
    fn poll_events(&mut self, timeout: Duration) -> Vec<PermissionEvent>;
}

/// An open device connection
pub trait UsbConnection: Send {
    fn interface(&self, index: u8) -> Option<InterfaceDescriptor>;

    fn claim_interface(&mut self, number: u8) -> Result<(), HostError>;

    fn release_interface(&mut self, number: u8) -> Result<(), HostError>;

    /// Bulk OUT transfer, returning the number of bytes written
    fn bulk_transfer(
        &mut self,
        endpoint: &EndpointDescriptor,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError>;

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError>;

    fn close(self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_constructors_set_direction_bit() {
        let out = EndpointDescriptor::bulk_out(0x81, 64);
        assert_eq!(out.address, 0x01);
        assert!(out.is_bulk_out());

        let inp = EndpointDescriptor::bulk_in(0x02, 64);
        assert_eq!(inp.address, 0x82);
        assert!(!inp.is_bulk_out());

        assert!(!EndpointDescriptor::interrupt_in(0x03, 8).is_bulk_out());
    }
}
