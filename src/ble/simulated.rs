//! In-memory platform stack
//!
//! Records every outbound call so behaviour can be asserted without a radio,
//! and optionally plays the platform's part by feeding events back through a
//! channel: service registrations are acknowledged, advertising is confirmed,
//! and a scripted central can connect, subscribe, read and write.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::adapter::{
    AdapterInfo, AdvertisingParameters, BleError, Capabilities, DeviceId, PlatformStack,
};
use super::gatt_server::{GattStatus, LinkState, PlatformEvent};
use super::gatt_service::{ServiceDefinition, CCCD_UUID, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};

/// One outbound call made by the emulator
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    SetDeviceName(String),
    RegisterService(Uuid),
    ClearServices,
    StartAdvertising(AdvertisingParameters),
    StopAdvertising,
    SendResponse {
        device: DeviceId,
        request_id: u32,
        status: GattStatus,
        value: Vec<u8>,
    },
    Notify {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CancelConnection(DeviceId),
}

#[derive(Debug)]
struct SimulatedState {
    calls: Vec<PlatformCall>,
    capabilities: Capabilities,
    radio_available: bool,
    fail_advertising: bool,
    fail_registration: bool,
    fail_notifications: bool,
}

/// Platform stack that records instead of transmitting
#[derive(Debug)]
pub struct SimulatedStack {
    state: Mutex<SimulatedState>,
    events: Option<mpsc::UnboundedSender<PlatformEvent>>,
    next_request_id: AtomicU32,
}

impl Default for SimulatedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStack {
    /// Recording-only stack; no events are generated
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Stack that also answers through an event channel, like a real radio
    pub fn with_event_channel() -> (Self, mpsc::UnboundedReceiver<PlatformEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(Some(tx)), rx)
    }

    fn build(events: Option<mpsc::UnboundedSender<PlatformEvent>>) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                calls: Vec::new(),
                capabilities: Capabilities::all(),
                radio_available: true,
                fail_advertising: false,
                fail_registration: false,
                fail_notifications: false,
            }),
            events,
            next_request_id: AtomicU32::new(1),
        }
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_radio_available(&self, available: bool) {
        self.state.lock().radio_available = available;
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.state.lock().fail_advertising = fail;
    }

    pub fn fail_registration(&self, fail: bool) {
        self.state.lock().fail_registration = fail;
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.state.lock().fail_notifications = fail;
    }

    /// Every call recorded so far
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().calls.clone()
    }

    /// Drain the recorded calls
    pub fn take_calls(&self) -> Vec<PlatformCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Notifications sent, as `(characteristic, payload)`
    pub fn notifications(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Notify {
                    characteristic,
                    value,
                    ..
                } => Some((*characteristic, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Responses sent, as `(request_id, status, payload)`
    pub fn responses(&self) -> Vec<(u32, GattStatus, Vec<u8>)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::SendResponse {
                    request_id,
                    status,
                    value,
                    ..
                } => Some((*request_id, *status, value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn advertising_starts(&self) -> usize {
        self.count(|c| matches!(c, PlatformCall::StartAdvertising(_)))
    }

    pub fn cancelled_connections(&self) -> Vec<DeviceId> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::CancelConnection(device) => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&PlatformCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: PlatformCall) {
        tracing::trace!("Simulated platform call: {:?}", call);
        self.state.lock().calls.push(call);
    }

    /// Deliver an event as if the platform had raised it
    pub fn inject(&self, event: PlatformEvent) {
        match &self.events {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::warn!("Simulated platform event dropped: receiver closed");
                }
            }
            None => tracing::debug!("Simulated platform has no event channel, dropping {:?}", event),
        }
    }

    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Scripted central: full connect sequence
    pub fn central_connect(&self, device: &DeviceId) {
        for new_state in [LinkState::Connecting, LinkState::Connected] {
            self.inject(PlatformEvent::ConnectionStateChanged {
                device: device.clone(),
                status: GattStatus::Success,
                new_state,
            });
        }
    }

    /// Scripted central: drop the link
    pub fn central_disconnect(&self, device: &DeviceId) {
        self.inject(PlatformEvent::ConnectionStateChanged {
            device: device.clone(),
            status: GattStatus::Success,
            new_state: LinkState::Disconnected,
        });
    }

    /// Scripted central: write the CCCD of `characteristic`
    pub fn central_set_notifications(&self, device: &DeviceId, characteristic: Uuid, enable: bool) -> u32 {
        let request_id = self.next_request_id();
        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        self.inject(PlatformEvent::DescriptorWriteRequest {
            device: device.clone(),
            request_id,
            characteristic,
            descriptor: CCCD_UUID,
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: Some(value.to_vec()),
        });
        request_id
    }

    /// Scripted central: read a characteristic
    pub fn central_read(&self, device: &DeviceId, characteristic: Uuid) -> u32 {
        let request_id = self.next_request_id();
        self.inject(PlatformEvent::CharacteristicReadRequest {
            device: device.clone(),
            request_id,
            offset: 0,
            characteristic,
        });
        request_id
    }

    /// Scripted central: write with response
    pub fn central_write(&self, device: &DeviceId, characteristic: Uuid, value: Vec<u8>) -> u32 {
        let request_id = self.next_request_id();
        self.inject(PlatformEvent::CharacteristicWriteRequest {
            device: device.clone(),
            request_id,
            characteristic,
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: Some(value),
        });
        request_id
    }
}

impl PlatformStack for SimulatedStack {
    fn capabilities(&self) -> Capabilities {
        self.state.lock().capabilities
    }

    fn is_radio_available(&self) -> bool {
        self.state.lock().radio_available
    }

    fn set_device_name(&self, name: &str) -> Result<(), BleError> {
        self.record(PlatformCall::SetDeviceName(name.to_string()));
        Ok(())
    }

    fn register_service(&self, service: &ServiceDefinition) -> Result<(), BleError> {
        self.record(PlatformCall::RegisterService(service.uuid));
        if self.state.lock().fail_registration {
            return Err(BleError::ServiceRegistrationFailed(format!(
                "simulated rejection of {}",
                service.uuid
            )));
        }
        self.inject(PlatformEvent::ServiceAdded {
            service: service.uuid,
            status: GattStatus::Success,
        });
        Ok(())
    }

    fn clear_services(&self) {
        self.record(PlatformCall::ClearServices);
    }

    fn start_advertising(&self, parameters: &AdvertisingParameters) -> Result<(), BleError> {
        self.record(PlatformCall::StartAdvertising(parameters.clone()));
        if self.state.lock().fail_advertising {
            return Err(BleError::AdvertisingFailed("simulated failure".to_string()));
        }
        self.inject(PlatformEvent::AdvertisingStarted);
        Ok(())
    }

    fn stop_advertising(&self) {
        self.record(PlatformCall::StopAdvertising);
    }

    fn send_response(
        &self,
        device: &DeviceId,
        request_id: u32,
        status: GattStatus,
        value: &[u8],
    ) -> Result<(), BleError> {
        self.record(PlatformCall::SendResponse {
            device: device.clone(),
            request_id,
            status,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn notify_characteristic_changed(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        if self.state.lock().fail_notifications {
            return Err(BleError::TransmissionFailed("simulated failure".to_string()));
        }
        self.record(PlatformCall::Notify {
            device: device.clone(),
            characteristic,
            value: value.to_vec(),
        });
        self.inject(PlatformEvent::NotificationSent {
            device: device.clone(),
            status: GattStatus::Success,
        });
        Ok(())
    }

    fn cancel_connection(&self, device: &DeviceId) {
        self.record(PlatformCall::CancelConnection(device.clone()));
    }

    fn adapter_info(&self) -> AdapterInfo {
        let state = self.state.lock();
        AdapterInfo {
            platform: "Simulated".to_string(),
            name: "Simulated Adapter".to_string(),
            address: "00:00:00:00:00:00".to_string(),
            powered: state.radio_available,
        }
    }
}
