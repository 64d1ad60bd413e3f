//! USB subsystem
//!
//! This module implements the device side of the bridge:
//! - OS collaborator traits and their rusb and in-memory backends
//! - Device Catalog (enumeration and lookup)
//! - Permission Broker (request-correlated permission prompts)
//! - Session Manager (the single open connection)
//!
//! Everything that touches the OS runs in a dedicated worker thread, reached
//! from the Tokio runtime through the command channel.

pub mod backend;
pub mod catalog;
pub mod channel;
pub mod mock;
pub mod permission;
pub mod profile;
pub mod rusb_backend;
pub mod session;
pub mod worker;

pub use backend::{
    Direction, EndpointDescriptor, InterfaceDescriptor, PermissionEvent, PermissionToken,
    PromptStatus, TransferKind, UsbConnection, UsbHost,
};
pub use catalog::{CatalogSnapshot, DeviceCatalog, LookupKey, check_filter};
pub use channel::{UsbBridge, UsbCommand, UsbWorker, create_usb_bridge};
pub use mock::{MockController, MockDevice, MockUsbHost, PromptPolicy};
pub use permission::{PendingPermission, PermissionBroker, PermissionTicket};
pub use profile::{AfterWrite, DeviceProfile, EndpointSelector, Preset, SerialDriver};
pub use rusb_backend::RusbHost;
pub use session::{Session, SessionManager, SessionState};
pub use worker::{UsbWorkerThread, WorkerSettings, spawn_usb_worker};
