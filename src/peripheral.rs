//! The emulated Nuimo peripheral
//!
//! [`Peripheral`] owns the whole GATT server state behind a single lock.
//! Platform events and UI input may arrive from any thread; listener
//! callbacks run after the lock has been released.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::battery::BatterySource;
use crate::ble::gatt_service::{LED_MATRIX_CHARACTERISTIC_UUID, SENSOR_ROTATION_CHARACTERISTIC_UUID};
use crate::ble::{
    AdapterInfo, AdvertisingController, ConnectionContext, ConnectionManager, ConnectionState,
    DeviceId, GattRequestDispatcher, GattResponse, PlatformEvent, PlatformStack, ServiceCatalog,
    SubscriptionRegistry,
};
use crate::config::EmulatorConfig;
use crate::input::{InputEventEncoder, Notification, RotationAccumulator, SwipeDirection};
use crate::listener::{self, ListenerRegistry, PeripheralEvent, PeripheralListener};
use crate::EmulatorError;

/// Mutable state, guarded as one unit
struct PeripheralState {
    connection: ConnectionManager,
    advertising: AdvertisingController,
    subscriptions: SubscriptionRegistry,
    rotation: RotationAccumulator,
}

impl PeripheralState {
    fn split<'a>(
        &'a mut self,
        platform: &'a dyn PlatformStack,
        events: &'a mut Vec<PeripheralEvent>,
    ) -> (&'a mut ConnectionManager, ConnectionContext<'a>) {
        (
            &mut self.connection,
            ConnectionContext {
                platform,
                advertising: &mut self.advertising,
                subscriptions: &mut self.subscriptions,
                events,
            },
        )
    }
}

/// Point-in-time view of the peripheral, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct PeripheralSnapshot {
    pub device_name: String,
    pub state: ConnectionState,
    pub connected_device: Option<DeviceId>,
    pub advertising: bool,
    /// Subscribed characteristics by name
    pub subscriptions: Vec<String>,
    pub registered_services: Vec<Uuid>,
    pub mtu: Option<u16>,
    /// Rotation waiting for the rate limit
    pub pending_rotation: f64,
}

/// Nuimo GATT server
pub struct Peripheral {
    config: EmulatorConfig,
    catalog: ServiceCatalog,
    platform: Arc<dyn PlatformStack>,
    dispatcher: GattRequestDispatcher,
    encoder: InputEventEncoder,
    state: Mutex<PeripheralState>,
    listeners: RwLock<ListenerRegistry>,
}

impl Peripheral {
    pub fn new(
        platform: Arc<dyn PlatformStack>,
        battery: Arc<dyn BatterySource>,
        config: EmulatorConfig,
    ) -> Self {
        let catalog = ServiceCatalog::nuimo();
        let state = PeripheralState {
            connection: ConnectionManager::new(&catalog),
            advertising: AdvertisingController::new(config.advertising_parameters()),
            subscriptions: SubscriptionRegistry::new(catalog),
            rotation: RotationAccumulator::new(),
        };

        Self {
            dispatcher: GattRequestDispatcher::new(catalog, battery),
            encoder: config.encoder(),
            config,
            catalog,
            platform,
            state: Mutex::new(state),
            listeners: RwLock::new(ListenerRegistry::new()),
        }
    }

    /// Build with the battery source named in `config`
    pub fn from_config(platform: Arc<dyn PlatformStack>, config: EmulatorConfig) -> Self {
        let battery = config.battery_source();
        Self::new(platform, battery, config)
    }

    pub fn add_listener(&self, listener: Arc<dyn PeripheralListener>) {
        self.listeners.write().add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PeripheralListener>) -> bool {
        self.listeners.write().remove(listener)
    }

    fn dispatch(&self, events: Vec<PeripheralEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().snapshot();
        listener::dispatch(&listeners, &events);
    }

    /// Register the services and start advertising once they are all added.
    ///
    /// Any previous session is torn down first. Failures are returned and
    /// also reported to listeners through `on_initialization_failed`; the
    /// peripheral then stays powered off until called again.
    pub fn power_on(&self) -> Result<(), EmulatorError> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.state.lock();
            self.power_on_locked(&mut guard, &mut events)
        };

        if let Err(e) = &result {
            tracing::error!("Power on failed: {}", e);
            events.push(PeripheralEvent::InitializationFailed(e.to_string()));
        }
        self.dispatch(events);
        result
    }

    fn power_on_locked(
        &self,
        state: &mut PeripheralState,
        events: &mut Vec<PeripheralEvent>,
    ) -> Result<(), EmulatorError> {
        tracing::info!("🚀 Powering on {}", self.config.device_name);
        state.rotation.reset();
        let (connection, mut ctx) = state.split(self.platform.as_ref(), events);
        connection.reset(&mut ctx);

        if let Some(missing) = self.platform.capabilities().missing() {
            return Err(EmulatorError::Initialization(format!("{} unavailable", missing)));
        }

        if let Err(e) = self.platform.set_device_name(&self.config.device_name) {
            tracing::warn!("Could not set device name: {}", e);
        }

        connection.begin_power_on();
        for service in self.catalog.services() {
            tracing::debug!("Registering {} service {}", service.name, service.uuid);
            if let Err(e) = self.platform.register_service(service) {
                connection.reset(&mut ctx);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Tear everything down. Safe in every state.
    pub fn power_off(&self) {
        let mut events = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.rotation.reset();
            let (connection, mut ctx) = state.split(self.platform.as_ref(), &mut events);
            connection.reset(&mut ctx);
        }
        tracing::info!("🛑 Powered off");
        self.dispatch(events);
    }

    /// Returns whether a notification was sent
    pub fn press_button(&self) -> bool {
        self.send_input(self.encoder.button(true))
    }

    pub fn release_button(&self) -> bool {
        self.send_input(self.encoder.button(false))
    }

    pub fn swipe(&self, direction: SwipeDirection) -> bool {
        tracing::debug!("Swipe {}", direction);
        self.send_input(self.encoder.swipe(direction))
    }

    /// Turn the dial by `delta` turns (negative is counter-clockwise).
    ///
    /// Rotation arriving faster than the configured rate is accumulated and
    /// sent with the next notification that is due. Input while no central
    /// is listening is dropped.
    pub fn rotate(&self, delta: f64) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(device) = state.connection.connected_device() else {
            tracing::trace!("Rotation ignored: not connected");
            return false;
        };
        if !state.subscriptions.is_subscribed(&SENSOR_ROTATION_CHARACTERISTIC_UUID) {
            tracing::trace!("Rotation ignored: not subscribed");
            return false;
        }

        let now = Instant::now();
        let Some(notification) = self.encoder.rotation(&mut state.rotation, delta, now) else {
            return false;
        };
        match self.platform.notify_characteristic_changed(
            device,
            notification.characteristic,
            &notification.payload,
        ) {
            Ok(()) => {
                tracing::debug!("Rotation sent: {}", hex::encode(&notification.payload));
                state.rotation.commit(now);
                true
            }
            Err(e) => {
                tracing::warn!("Rotation notification failed: {}", e);
                false
            }
        }
    }

    fn send_input(&self, notification: Notification) -> bool {
        let state = self.state.lock();
        let Some(device) = state.connection.connected_device() else {
            tracing::trace!("Input ignored: not connected");
            return false;
        };
        if !state.subscriptions.is_subscribed(&notification.characteristic) {
            tracing::trace!(
                "Input ignored: {} not subscribed",
                self.catalog.describe(&notification.characteristic)
            );
            return false;
        }

        match self.platform.notify_characteristic_changed(
            device,
            notification.characteristic,
            &notification.payload,
        ) {
            Ok(()) => {
                tracing::debug!(
                    "Notified {}: {}",
                    self.catalog.describe(&notification.characteristic),
                    hex::encode(&notification.payload)
                );
                true
            }
            Err(e) => {
                tracing::warn!("Notification failed: {}", e);
                false
            }
        }
    }

    /// Drive the peripheral from a platform event channel until it closes
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_platform_event(event);
        }
        tracing::debug!("Platform event channel closed");
    }

    /// Apply one inbound platform event
    pub fn handle_platform_event(&self, event: PlatformEvent) {
        let mut events = Vec::new();
        {
            let mut guard = self.state.lock();
            self.apply(&mut guard, event, &mut events);
        }
        self.dispatch(events);
    }

    fn apply(
        &self,
        state: &mut PeripheralState,
        event: PlatformEvent,
        events: &mut Vec<PeripheralEvent>,
    ) {
        match event {
            PlatformEvent::ServiceAdded { service, status } => {
                let (connection, mut ctx) = state.split(self.platform.as_ref(), events);
                if let Err(reason) = connection.on_service_added(&mut ctx, service, status) {
                    tracing::error!("Initialization failed: {}", reason);
                    connection.reset(&mut ctx);
                    ctx.events.push(PeripheralEvent::InitializationFailed(reason));
                    state.rotation.reset();
                }
            }

            PlatformEvent::ConnectionStateChanged {
                device,
                status,
                new_state,
            } => {
                tracing::debug!("Link {} -> {:?} ({})", device, new_state, status);
                let (connection, mut ctx) = state.split(self.platform.as_ref(), events);
                connection.on_connection_state_change(&mut ctx, device, status, new_state);
                if !state.connection.state().is_connected() {
                    state.rotation.reset();
                }
            }

            PlatformEvent::CharacteristicReadRequest {
                device,
                request_id,
                offset,
                characteristic,
            } => {
                tracing::debug!(
                    "Read {} (request {}, offset {})",
                    self.catalog.describe(&characteristic),
                    request_id,
                    offset
                );
                let response = self.dispatcher.on_characteristic_read(characteristic);
                self.respond(&device, request_id, response);
            }

            PlatformEvent::CharacteristicWriteRequest {
                device,
                request_id,
                characteristic,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                tracing::debug!(
                    "Write {} (request {}, prepared {}, response {})",
                    self.catalog.describe(&characteristic),
                    request_id,
                    prepared_write,
                    response_needed
                );
                let response = self.dispatcher.on_characteristic_write(
                    characteristic,
                    value.as_deref(),
                    offset,
                    response_needed,
                );
                let accepted = response.status.is_success();
                self.respond(&device, request_id, response);

                if accepted && characteristic == LED_MATRIX_CHARACTERISTIC_UUID {
                    events.push(PeripheralEvent::LedMatrixWrite {
                        device,
                        payload: value.unwrap_or_default(),
                    });
                }
            }

            PlatformEvent::DescriptorReadRequest {
                device,
                request_id,
                characteristic,
                descriptor,
                ..
            } => {
                let response = self.dispatcher.on_descriptor_read(characteristic, descriptor);
                self.respond(&device, request_id, response);
            }

            PlatformEvent::DescriptorWriteRequest {
                device,
                request_id,
                characteristic,
                descriptor,
                value,
                ..
            } => {
                let response = self.dispatcher.on_descriptor_write(
                    &mut state.subscriptions,
                    characteristic,
                    descriptor,
                    value.as_deref(),
                );
                self.respond(&device, request_id, response);
            }

            PlatformEvent::NotificationSent { device, status } => {
                if status.is_success() {
                    tracing::trace!("Notification delivered to {}", device);
                } else {
                    tracing::warn!("Notification to {} failed: {}", device, status);
                }
            }

            PlatformEvent::MtuChanged { device, mtu } => {
                state.connection.on_mtu_changed(&device, mtu);
            }

            PlatformEvent::AdvertisingStarted => {
                tracing::info!("📡 Advertising on air");
            }

            PlatformEvent::AdvertisingFailed { reason } => {
                let (connection, mut ctx) = state.split(self.platform.as_ref(), events);
                connection.on_advertising_failed(&mut ctx, reason);
            }
        }
    }

    fn respond(&self, device: &DeviceId, request_id: u32, response: GattResponse) {
        if let Err(e) =
            self.platform
                .send_response(device, request_id, response.status, &response.value)
        {
            tracing::warn!("Response to request {} failed: {}", request_id, e);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().connection.state().clone()
    }

    pub fn connected_device(&self) -> Option<DeviceId> {
        self.state.lock().connection.connected_device().cloned()
    }

    pub fn is_advertising(&self) -> bool {
        self.state.lock().advertising.is_advertising()
    }

    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.state.lock().subscriptions.is_subscribed(characteristic)
    }

    pub fn snapshot(&self) -> PeripheralSnapshot {
        let state = self.state.lock();
        PeripheralSnapshot {
            device_name: self.config.device_name.clone(),
            state: state.connection.state().clone(),
            connected_device: state.connection.connected_device().cloned(),
            advertising: state.advertising.is_advertising(),
            subscriptions: state
                .subscriptions
                .subscribed()
                .iter()
                .map(|uuid| self.catalog.describe(uuid))
                .collect(),
            registered_services: state.connection.registered_services(),
            mtu: state.connection.mtu(),
            pending_rotation: state.rotation.accumulated(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.platform.adapter_info()
    }
}
