//! libusb backend
//!
//! Desktop hosts have no permission dialog: a device is "permitted" when its
//! device node can be opened, and `request_permission` answers immediately.

use crate::error::HostError;
use crate::usb::backend::{
    Direction, EndpointDescriptor, InterfaceDescriptor, PermissionEvent, PermissionToken,
    PromptStatus, TransferKind, UsbConnection, UsbHost,
};
use protocol::{DeviceDescriptor, DeviceId};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

const ROOT_HUB_VENDOR: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

/// Android-compatible device id: `bus * 1000 + address`
pub fn device_id_of(bus: u8, address: u8) -> DeviceId {
    DeviceId(u32::from(bus) * 1000 + u32::from(address))
}

/// Device node path for a bus/address pair
pub fn device_node_of(bus: u8, address: u8) -> String {
    format!("/dev/bus/usb/{:03}/{:03}", bus, address)
}

/// `UsbHost` backed by a libusb context
pub struct RusbHost {
    context: Context,
    detach_kernel_driver: bool,
}

impl RusbHost {
    pub fn new(detach_kernel_driver: bool) -> Result<Self, HostError> {
        Ok(Self {
            context: Context::new()?,
            detach_kernel_driver,
        })
    }

    fn find(&self, id: DeviceId) -> Result<Device<Context>, HostError> {
        self.context
            .devices()?
            .iter()
            .find(|d| device_id_of(d.bus_number(), d.address()) == id)
            .ok_or(HostError::NoDevice)
    }

    fn describe(device: &Device<Context>) -> Result<Option<DeviceDescriptor>, HostError> {
        let descriptor = device.device_descriptor()?;

        // Root hubs are never serial targets
        if descriptor.vendor_id() == ROOT_HUB_VENDOR && descriptor.class_code() == HUB_CLASS {
            return Ok(None);
        }

        let interface_count = device
            .active_config_descriptor()
            .or_else(|_| device.config_descriptor(0))
            .map(|config| config.num_interfaces())
            .unwrap_or(0);

        // String descriptors need an open handle; without access they stay absent
        let (manufacturer_name, product_name) = match device.open() {
            Ok(handle) => (
                descriptor
                    .manufacturer_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
                descriptor
                    .product_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
            ),
            Err(_) => (None, None),
        };

        Ok(Some(DeviceDescriptor {
            device_id: device_id_of(device.bus_number(), device.address()),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device_class: descriptor.class_code(),
            device_protocol: descriptor.protocol_code(),
            interface_count,
            device_name: device_node_of(device.bus_number(), device.address()),
            product_name,
            manufacturer_name,
        }))
    }

    fn read_interfaces(device: &Device<Context>) -> Vec<InterfaceDescriptor> {
        let config = match device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to get active config descriptor: {}", e);
                return Vec::new();
            }
        };

        config
            .interfaces()
            .filter_map(|interface| interface.descriptors().next())
            .map(|alt| InterfaceDescriptor {
                number: alt.interface_number(),
                class: alt.class_code(),
                endpoints: alt
                    .endpoint_descriptors()
                    .map(|ep| EndpointDescriptor {
                        address: ep.address(),
                        direction: match ep.direction() {
                            rusb::Direction::In => Direction::In,
                            rusb::Direction::Out => Direction::Out,
                        },
                        kind: match ep.transfer_type() {
                            rusb::TransferType::Control => TransferKind::Control,
                            rusb::TransferType::Isochronous => TransferKind::Isochronous,
                            rusb::TransferType::Bulk => TransferKind::Bulk,
                            rusb::TransferType::Interrupt => TransferKind::Interrupt,
                        },
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect(),
            })
            .collect()
    }
}

impl UsbHost for RusbHost {
    type Connection = RusbConnection;

    fn devices(&mut self) -> Result<Vec<DeviceDescriptor>, HostError> {
        let mut descriptors = Vec::new();
        for device in self.context.devices()?.iter() {
            match Self::describe(&device) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {}
                Err(e) => warn!(
                    "Failed to read device {}:{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        debug!("Enumerated {} devices", descriptors.len());
        Ok(descriptors)
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.find(device.device_id)
            .and_then(|d| d.open().map_err(HostError::from))
            .is_ok()
    }

    fn request_permission(
        &mut self,
        device: &DeviceDescriptor,
        _token: PermissionToken,
    ) -> Result<PromptStatus, HostError> {
        self.find(device.device_id)?;
        Ok(PromptStatus::Decided(self.has_permission(device)))
    }

    fn serial_number(&mut self, device: &DeviceDescriptor) -> Result<Option<String>, HostError> {
        let usb_device = self.find(device.device_id)?;
        let descriptor = usb_device.device_descriptor()?;
        let handle = usb_device.open()?;

        Ok(descriptor
            .serial_number_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()))
    }

    fn open(&mut self, device: &DeviceDescriptor) -> Result<RusbConnection, HostError> {
        let usb_device = self.find(device.device_id)?;
        let handle = usb_device.open()?;
        debug!("Opened device {}", device.device_id);

        Ok(RusbConnection {
            handle,
            interfaces: Self::read_interfaces(&usb_device),
            detach_kernel_driver: self.detach_kernel_driver,
            detached: Vec::new(),
            claimed: Vec::new(),
        })
    }

    fn poll_events(&mut self, timeout: Duration) -> Vec<PermissionEvent> {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => debug!("USB event handling interrupted"),
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(timeout);
            }
        }
        // libusb never reports permission notifications
        Vec::new()
    }
}

/// Open libusb device handle
pub struct RusbConnection {
    handle: DeviceHandle<Context>,
    interfaces: Vec<InterfaceDescriptor>,
    detach_kernel_driver: bool,
    detached: Vec<u8>,
    claimed: Vec<u8>,
}

impl RusbConnection {
    fn reattach(&mut self, number: u8) {
        if !self.detached.contains(&number) {
            return;
        }
        self.detached.retain(|&n| n != number);
        match self.handle.attach_kernel_driver(number) {
            Ok(()) => debug!("Reattached kernel driver to interface {}", number),
            Err(e) => debug!(
                "Could not reattach kernel driver to interface {}: {}",
                number, e
            ),
        }
    }
}

impl UsbConnection for RusbConnection {
    fn interface(&self, index: u8) -> Option<InterfaceDescriptor> {
        self.interfaces.get(usize::from(index)).cloned()
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), HostError> {
        if self.detach_kernel_driver {
            match self.handle.kernel_driver_active(number) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", number);
                    match self.handle.detach_kernel_driver(number) {
                        Ok(()) => self.detached.push(number),
                        Err(e) => warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            number, e
                        ),
                    }
                }
                Ok(false) => {}
                Err(e) => debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                ),
            }
        }

        if let Err(e) = self.handle.claim_interface(number) {
            self.reattach(number);
            return Err(e.into());
        }
        self.claimed.push(number);
        Ok(())
    }

    fn release_interface(&mut self, number: u8) -> Result<(), HostError> {
        self.claimed.retain(|&n| n != number);
        let result = self.handle.release_interface(number).map_err(HostError::from);
        self.reattach(number);
        result
    }

    fn bulk_transfer(
        &mut self,
        endpoint: &EndpointDescriptor,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        debug!(
            "Bulk transfer: endpoint={:#x}, data_len={}, timeout={}ms",
            endpoint.address,
            data.len(),
            timeout.as_millis()
        );
        Ok(self.handle.write_bulk(endpoint.address, data, timeout)?)
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}",
            request_type, request, value, index
        );
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn close(mut self) {
        for number in std::mem::take(&mut self.claimed) {
            if let Err(e) = self.handle.release_interface(number) {
                warn!("Failed to release interface {}: {}", number, e);
            }
            self.reattach(number);
        }
        debug!("Closed libusb handle");
    }
}
