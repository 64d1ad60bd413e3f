//! Common utilities for usb-serial-bridge
//!
//! This crate provides shared functionality for the host crate and its
//! tests: the shared error type, logging setup, and test utilities
//! (mock device descriptors, async timeouts).

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
