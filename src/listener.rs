//! Peripheral event listeners
//!
//! Listeners are invoked in registration order, after the peripheral has
//! released its state lock, so a listener may call back into the peripheral.

use std::sync::Arc;

use crate::ble::DeviceId;

/// Receives connection and lifecycle events from a [`Peripheral`](crate::Peripheral)
pub trait PeripheralListener: Send + Sync {
    /// A central completed its connection
    fn on_connect(&self, device: &DeviceId);

    /// The connected central went away (or was dropped by power-off)
    fn on_disconnect(&self, device: &DeviceId);

    fn on_advertising_started(&self) {}

    fn on_advertising_failed(&self, _reason: &str) {}

    /// Power-on could not complete; call `power_on()` again to retry
    fn on_initialization_failed(&self, _reason: &str) {}

    /// The central wrote a valid 13-byte LED matrix frame
    fn on_led_matrix_write(&self, _device: &DeviceId, _payload: &[u8]) {}
}

/// Event queued while the state lock is held, delivered once it is released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    Connected(DeviceId),
    Disconnected(DeviceId),
    AdvertisingStarted,
    AdvertisingFailed(String),
    InitializationFailed(String),
    LedMatrixWrite { device: DeviceId, payload: Vec<u8> },
}

impl PeripheralEvent {
    pub fn deliver(&self, listener: &dyn PeripheralListener) {
        match self {
            PeripheralEvent::Connected(device) => listener.on_connect(device),
            PeripheralEvent::Disconnected(device) => listener.on_disconnect(device),
            PeripheralEvent::AdvertisingStarted => listener.on_advertising_started(),
            PeripheralEvent::AdvertisingFailed(reason) => listener.on_advertising_failed(reason),
            PeripheralEvent::InitializationFailed(reason) => {
                listener.on_initialization_failed(reason)
            }
            PeripheralEvent::LedMatrixWrite { device, payload } => {
                listener.on_led_matrix_write(device, payload)
            }
        }
    }
}

/// Ordered set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn PeripheralListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn PeripheralListener>) {
        self.listeners.push(listener);
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove(&mut self, listener: &Arc<dyn PeripheralListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Snapshot of the current listeners, for dispatch outside any lock
    pub fn snapshot(&self) -> Vec<Arc<dyn PeripheralListener>> {
        self.listeners.clone()
    }
}

/// Deliver every event to every listener, events in order, listeners in order
pub fn dispatch(listeners: &[Arc<dyn PeripheralListener>], events: &[PeripheralEvent]) {
    for event in events {
        for listener in listeners {
            event.deliver(listener.as_ref());
        }
    }
}
