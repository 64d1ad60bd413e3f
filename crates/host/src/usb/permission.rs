//! Permission Broker
//!
//! Every prompt gets its own [`PermissionToken`]. The registry maps each
//! token to the device it was issued for and a one-shot result handle, so a
//! notification only ever resolves the request that issued it. Entries are
//! removed exactly once under the registry lock: by [`PermissionBroker::deliver`]
//! on a matching notification, or by dropping the [`PendingPermission`].

use crate::error::PermissionError;
use crate::usb::backend::{PermissionEvent, PermissionToken, PromptStatus, UsbHost};
use protocol::{DeviceDescriptor, DeviceId, PermissionState};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct PendingEntry {
    device_id: DeviceId,
    sender: oneshot::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    pending: HashMap<PermissionToken, PendingEntry>,
    denied: HashSet<DeviceId>,
}

impl Registry {
    fn record(&mut self, device_id: DeviceId, granted: bool) {
        if granted {
            self.denied.remove(&device_id);
        } else {
            self.denied.insert(device_id);
        }
    }
}

/// Correlating registry of outstanding permission requests
#[derive(Clone, Default)]
pub struct PermissionBroker {
    registry: Arc<Mutex<Registry>>,
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the OS for access to `device`
    ///
    /// Returns at once when access is already granted or the OS answers
    /// without a prompt; otherwise returns a ticket that resolves on the
    /// matching notification.
    pub fn request<H: UsbHost>(
        &self,
        host: &mut H,
        device: &DeviceDescriptor,
    ) -> Result<PermissionTicket, PermissionError> {
        let device_id = device.device_id;
        if host.has_permission(device) {
            self.registry().record(device_id, true);
            return Ok(PermissionTicket::Decided(device_id, true));
        }

        let (sender, outcome) = oneshot::channel();
        let token = {
            let mut registry = self.registry();
            registry.next_token += 1;
            let token = PermissionToken(registry.next_token);
            registry
                .pending
                .insert(token, PendingEntry { device_id, sender });
            token
        };

        match host.request_permission(device, token) {
            Ok(PromptStatus::Prompted) => {
                info!("Permission prompt {} shown for device {}", token, device_id);
                Ok(PermissionTicket::Pending(PendingPermission {
                    token,
                    device_id,
                    outcome,
                    broker: self.clone(),
                }))
            }
            Ok(PromptStatus::Decided(granted)) => {
                let mut registry = self.registry();
                registry.pending.remove(&token);
                registry.record(device_id, granted);
                debug!(
                    "OS decided permission for device {} without a prompt: {}",
                    device_id, granted
                );
                Ok(PermissionTicket::Decided(device_id, granted))
            }
            Err(e) => {
                self.registry().pending.remove(&token);
                warn!("Permission request for device {} failed: {}", device_id, e);
                Err(PermissionError::Host(e))
            }
        }
    }

    /// Route an OS notification to the request that issued its token
    ///
    /// Returns `false` when no outstanding request matches both the token
    /// and the device id; the registry is left untouched in that case.
    pub fn deliver(&self, event: PermissionEvent) -> bool {
        let mut registry = self.registry();
        match registry.pending.get(&event.token) {
            Some(entry) if entry.device_id == event.device_id => {}
            Some(entry) => {
                warn!(
                    "Ignoring permission notification {} for device {}: issued for device {}",
                    event.token, event.device_id, entry.device_id
                );
                return false;
            }
            None => {
                debug!(
                    "Ignoring permission notification {} with no outstanding request",
                    event.token
                );
                return false;
            }
        }

        let Some(entry) = registry.pending.remove(&event.token) else {
            return false;
        };
        registry.record(event.device_id, event.granted);
        info!(
            "Permission {} for device {}",
            if event.granted { "granted" } else { "denied" },
            event.device_id
        );
        // The waiter may already be gone; the entry is removed either way
        let _ = entry.sender.send(event.granted);
        true
    }

    /// Current view of a device's permission
    pub fn state<H: UsbHost>(&self, host: &H, device: &DeviceDescriptor) -> PermissionState {
        let registry = self.registry();
        if registry
            .pending
            .values()
            .any(|entry| entry.device_id == device.device_id)
        {
            PermissionState::PendingRequest
        } else if host.has_permission(device) {
            PermissionState::Granted
        } else if registry.denied.contains(&device.device_id) {
            PermissionState::Denied
        } else {
            PermissionState::Unknown
        }
    }

    /// Number of live listeners
    pub fn outstanding(&self) -> usize {
        self.registry().pending.len()
    }

    fn cancel(&self, token: PermissionToken) {
        if self.registry().pending.remove(&token).is_some() {
            debug!("Permission request {} cancelled", token);
        }
    }
}

/// Result of [`PermissionBroker::request`]
#[derive(Debug)]
pub enum PermissionTicket {
    /// Resolved without waiting
    Decided(DeviceId, bool),
    /// Waiting for the OS notification
    Pending(PendingPermission),
}

impl PermissionTicket {
    /// Wait for the outcome, mapping a refusal to `Denied`
    pub async fn wait(self) -> Result<(), PermissionError> {
        match self {
            PermissionTicket::Decided(_, true) => Ok(()),
            PermissionTicket::Decided(device_id, false) => {
                Err(PermissionError::Denied { device_id })
            }
            PermissionTicket::Pending(pending) => pending.wait().await,
        }
    }
}

/// An outstanding prompt; dropping it unregisters the listener
#[derive(Debug)]
pub struct PendingPermission {
    token: PermissionToken,
    device_id: DeviceId,
    outcome: oneshot::Receiver<bool>,
    broker: PermissionBroker,
}

impl PendingPermission {
    pub fn token(&self) -> PermissionToken {
        self.token
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub async fn wait(mut self) -> Result<(), PermissionError> {
        match (&mut self.outcome).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PermissionError::Denied {
                device_id: self.device_id,
            }),
            Err(_) => Err(PermissionError::Abandoned {
                device_id: self.device_id,
            }),
        }
    }
}

impl Drop for PendingPermission {
    fn drop(&mut self) {
        self.broker.cancel(self.token);
    }
}

impl std::fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
