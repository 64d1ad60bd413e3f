//! USB serial host
//!
//! Device Catalog, Permission Broker and Session Manager behind an async
//! Adapter Facade, plus the stdio bridge server the binary runs.

pub mod config;
pub mod error;
pub mod facade;
pub mod serve;
pub mod usb;

pub use error::{HostError, LookupError, PermissionError, SessionError};
pub use facade::SerialPortModule;
