//! Connection state machine
//!
//! Enforces the single-central rule and drives the
//! PoweredOff → Initializing → Advertising ⇄ Connecting → Connected cycle.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::adapter::{DeviceId, PlatformStack};
use super::advertising::{AdvertisingController, AdvertisingOutcome};
use super::gatt_server::{GattStatus, LinkState};
use super::gatt_service::ServiceCatalog;
use super::subscriptions::SubscriptionRegistry;
use crate::listener::PeripheralEvent;

/// Lifecycle state of the emulated peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    PoweredOff,
    /// Services are being registered
    Initializing,
    Advertising,
    /// A central is negotiating the link
    Connecting(DeviceId),
    Connected(DeviceId),
}

impl ConnectionState {
    /// Device holding the link, if any
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            ConnectionState::Connecting(device) | ConnectionState::Connected(device) => Some(device),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::PoweredOff => write!(f, "powered off"),
            ConnectionState::Initializing => write!(f, "initializing"),
            ConnectionState::Advertising => write!(f, "advertising"),
            ConnectionState::Connecting(device) => write!(f, "connecting to {}", device),
            ConnectionState::Connected(device) => write!(f, "connected to {}", device),
        }
    }
}

/// Everything a transition may touch besides the manager itself
pub struct ConnectionContext<'a> {
    pub platform: &'a dyn PlatformStack,
    pub advertising: &'a mut AdvertisingController,
    pub subscriptions: &'a mut SubscriptionRegistry,
    /// Listener events produced by the transition
    pub events: &'a mut Vec<PeripheralEvent>,
}

impl ConnectionContext<'_> {
    fn start_advertising(&mut self) {
        match self.advertising.start(self.platform) {
            AdvertisingOutcome::Started => self.events.push(PeripheralEvent::AdvertisingStarted),
            AdvertisingOutcome::AlreadyAdvertising => {}
            AdvertisingOutcome::RadioUnavailable => self
                .events
                .push(PeripheralEvent::InitializationFailed("radio unavailable".to_string())),
            AdvertisingOutcome::Failed(e) => {
                self.events.push(PeripheralEvent::AdvertisingFailed(e.to_string()))
            }
        }
    }
}

/// Connection manager
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Services that must be acknowledged before advertising
    expected: BTreeSet<Uuid>,
    registered: BTreeSet<Uuid>,
    mtu: Option<u16>,
}

impl ConnectionManager {
    pub fn new(catalog: &ServiceCatalog) -> Self {
        Self {
            state: ConnectionState::PoweredOff,
            expected: catalog.service_uuids().into_iter().collect(),
            registered: BTreeSet::new(),
            mtu: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The connected central, only once the link is fully up
    pub fn connected_device(&self) -> Option<&DeviceId> {
        match &self.state {
            ConnectionState::Connected(device) => Some(device),
            _ => None,
        }
    }

    pub fn registered_services(&self) -> Vec<Uuid> {
        self.registered.iter().copied().collect()
    }

    pub fn all_services_registered(&self) -> bool {
        self.registered == self.expected
    }

    pub fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    /// Record the negotiated MTU of the current link
    pub fn on_mtu_changed(&mut self, device: &DeviceId, mtu: u16) {
        if self.state.device() == Some(device) {
            tracing::trace!("MTU for {} is now {}", device, mtu);
            self.mtu = Some(mtu);
        } else {
            tracing::debug!("Ignoring MTU change from {}", device);
        }
    }

    /// PoweredOff → Initializing; services are registered by the caller
    pub fn begin_power_on(&mut self) {
        self.registered.clear();
        self.mtu = None;
        self.state = ConnectionState::Initializing;
        tracing::info!("Registering {} services", self.expected.len());
    }

    /// A service registration was acknowledged by the platform.
    ///
    /// Returns an error message if the platform rejected the service; the
    /// caller is expected to reset.
    pub fn on_service_added(
        &mut self,
        ctx: &mut ConnectionContext<'_>,
        service: Uuid,
        status: GattStatus,
    ) -> Result<(), String> {
        if self.state == ConnectionState::PoweredOff {
            tracing::debug!("Ignoring service-added for {} while powered off", service);
            return Ok(());
        }
        if !self.expected.contains(&service) {
            tracing::warn!("Ignoring service-added for unknown service {}", service);
            return Ok(());
        }
        if !status.is_success() {
            return Err(format!("service {} rejected: {}", service, status));
        }

        if !self.registered.insert(service) {
            tracing::debug!("Duplicate service-added for {}", service);
            return Ok(());
        }
        tracing::debug!(
            "Service {} registered ({}/{})",
            service,
            self.registered.len(),
            self.expected.len()
        );

        // A central may have linked up before the last ack; advertising then
        // waits for the link to drop.
        if self.all_services_registered() && self.state == ConnectionState::Initializing {
            tracing::info!("✅ All services registered");
            self.state = ConnectionState::Advertising;
            ctx.start_advertising();
        }
        Ok(())
    }

    /// Apply a link-state change reported by the platform
    pub fn on_connection_state_change(
        &mut self,
        ctx: &mut ConnectionContext<'_>,
        device: DeviceId,
        status: GattStatus,
        new_state: LinkState,
    ) {
        match &self.state {
            ConnectionState::PoweredOff => {
                tracing::debug!("Ignoring {} link report while powered off", device);
                return;
            }
            ConnectionState::Connecting(current) | ConnectionState::Connected(current)
                if *current != device =>
            {
                tracing::warn!("Refusing {}: already linked with {}", device, current);
                ctx.platform.cancel_connection(&device);
                return;
            }
            _ => {}
        }

        if !status.is_success() {
            tracing::warn!("Link with {} failed: {}", device, status);
            self.on_link_lost(ctx);
            return;
        }

        match new_state {
            LinkState::Connecting => {
                ctx.advertising.stop(ctx.platform);
                if !self.state.is_connected() {
                    tracing::debug!("{} is connecting", device);
                    self.state = ConnectionState::Connecting(device);
                }
            }
            LinkState::Connected => {
                ctx.advertising.stop(ctx.platform);
                if !self.state.is_connected() {
                    tracing::info!("🔗 Connected to {}", device);
                    self.state = ConnectionState::Connected(device.clone());
                    ctx.events.push(PeripheralEvent::Connected(device));
                }
            }
            LinkState::Disconnecting | LinkState::Disconnected => self.on_link_lost(ctx),
        }
    }

    fn on_link_lost(&mut self, ctx: &mut ConnectionContext<'_>) {
        let next = if self.all_services_registered() {
            ConnectionState::Advertising
        } else {
            ConnectionState::Initializing
        };

        match std::mem::replace(&mut self.state, next) {
            ConnectionState::Connected(previous) => {
                tracing::info!("🔌 Disconnected from {}", previous);
                ctx.platform.cancel_connection(&previous);
                ctx.events.push(PeripheralEvent::Disconnected(previous));
            }
            ConnectionState::Connecting(previous) => {
                tracing::debug!("Connection attempt from {} abandoned", previous);
            }
            _ => {}
        }
        ctx.subscriptions.clear();
        self.mtu = None;

        if self.state == ConnectionState::Advertising {
            ctx.start_advertising();
        }
    }

    /// The platform reported that advertising did not come up
    pub fn on_advertising_failed(&mut self, ctx: &mut ConnectionContext<'_>, reason: String) {
        tracing::error!("Advertising failed: {}", reason);
        ctx.advertising.on_start_failed();
        ctx.events.push(PeripheralEvent::AdvertisingFailed(reason));
    }

    /// Return to PoweredOff from any state
    pub fn reset(&mut self, ctx: &mut ConnectionContext<'_>) {
        ctx.advertising.stop(ctx.platform);
        ctx.subscriptions.clear();

        match std::mem::replace(&mut self.state, ConnectionState::PoweredOff) {
            ConnectionState::Connected(device) => {
                ctx.platform.cancel_connection(&device);
                ctx.events.push(PeripheralEvent::Disconnected(device));
            }
            ConnectionState::Connecting(device) => ctx.platform.cancel_connection(&device),
            _ => {}
        }

        ctx.platform.clear_services();
        self.registered.clear();
        self.mtu = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{PlatformCall, SimulatedStack};
    use crate::config::EmulatorConfig;

    struct Harness {
        platform: SimulatedStack,
        manager: ConnectionManager,
        advertising: AdvertisingController,
        subscriptions: SubscriptionRegistry,
        events: Vec<PeripheralEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let catalog = ServiceCatalog::nuimo();
            Self {
                platform: SimulatedStack::new(),
                manager: ConnectionManager::new(&catalog),
                advertising: AdvertisingController::new(
                    EmulatorConfig::default().advertising_parameters(),
                ),
                subscriptions: SubscriptionRegistry::new(catalog),
                events: Vec::new(),
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut ConnectionManager, &mut ConnectionContext<'_>) -> R) -> R {
            let mut ctx = ConnectionContext {
                platform: &self.platform,
                advertising: &mut self.advertising,
                subscriptions: &mut self.subscriptions,
                events: &mut self.events,
            };
            f(&mut self.manager, &mut ctx)
        }

        fn powered_on() -> Self {
            let mut harness = Self::new();
            harness.manager.begin_power_on();
            for uuid in ServiceCatalog::nuimo().service_uuids() {
                harness
                    .with(|m, ctx| m.on_service_added(ctx, uuid, GattStatus::Success))
                    .unwrap();
            }
            harness
        }

        fn link(&mut self, device: &str, new_state: LinkState) {
            let device = DeviceId::from(device);
            self.with(|m, ctx| {
                m.on_connection_state_change(ctx, device, GattStatus::Success, new_state)
            });
        }
    }

    #[test]
    fn test_advertises_once_all_services_registered() {
        let mut harness = Harness::new();
        harness.manager.begin_power_on();
        let services = ServiceCatalog::nuimo().service_uuids();

        for uuid in &services[..3] {
            harness
                .with(|m, ctx| m.on_service_added(ctx, *uuid, GattStatus::Success))
                .unwrap();
            // Duplicates do not count twice
            harness
                .with(|m, ctx| m.on_service_added(ctx, *uuid, GattStatus::Success))
                .unwrap();
        }
        assert_eq!(harness.manager.state(), &ConnectionState::Initializing);
        assert_eq!(harness.platform.advertising_starts(), 0);

        harness
            .with(|m, ctx| m.on_service_added(ctx, services[3], GattStatus::Success))
            .unwrap();
        harness
            .with(|m, ctx| m.on_service_added(ctx, services[3], GattStatus::Success))
            .unwrap();

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert_eq!(harness.platform.advertising_starts(), 1);
        assert_eq!(harness.events, vec![PeripheralEvent::AdvertisingStarted]);
    }

    #[test]
    fn test_rejected_service_is_an_error() {
        let mut harness = Harness::new();
        harness.manager.begin_power_on();
        let uuid = ServiceCatalog::nuimo().service_uuids()[0];

        let result = harness.with(|m, ctx| m.on_service_added(ctx, uuid, GattStatus::Failure));
        assert!(result.is_err());

        let unknown = harness.with(|m, ctx| m.on_service_added(ctx, Uuid::nil(), GattStatus::Success));
        assert!(unknown.is_ok());
        assert!(harness.manager.registered_services().is_empty());
    }

    #[test]
    fn test_connect_emits_once() {
        let mut harness = Harness::powered_on();
        harness.events.clear();

        harness.link("d1", LinkState::Connecting);
        assert_eq!(
            harness.manager.state(),
            &ConnectionState::Connecting(DeviceId::from("d1"))
        );
        assert!(!harness.advertising.is_advertising());

        harness.link("d1", LinkState::Connected);
        harness.link("d1", LinkState::Connected);

        assert_eq!(harness.manager.connected_device(), Some(&DeviceId::from("d1")));
        assert_eq!(harness.events, vec![PeripheralEvent::Connected(DeviceId::from("d1"))]);
    }

    #[test]
    fn test_second_central_refused() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);
        harness.events.clear();

        harness.link("d2", LinkState::Connecting);
        harness.link("d2", LinkState::Connected);
        harness.link("d2", LinkState::Disconnected);

        assert_eq!(
            harness.manager.state(),
            &ConnectionState::Connected(DeviceId::from("d1"))
        );
        assert_eq!(harness.platform.cancelled_connections(), vec![DeviceId::from("d2"); 3]);
        assert!(harness.events.is_empty());
    }

    #[test]
    fn test_disconnect_clears_and_readvertises() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);
        harness.subscriptions.on_descriptor_write(
            crate::ble::gatt_service::SENSOR_BUTTON_CHARACTERISTIC_UUID,
            Some(&crate::ble::gatt_service::ENABLE_NOTIFICATION_VALUE[..]),
        );
        harness.events.clear();

        harness.link("d1", LinkState::Disconnected);

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert!(harness.subscriptions.is_empty());
        assert!(harness.advertising.is_advertising());
        assert_eq!(harness.platform.advertising_starts(), 2);
        assert_eq!(
            harness.events,
            vec![
                PeripheralEvent::Disconnected(DeviceId::from("d1")),
                PeripheralEvent::AdvertisingStarted,
            ]
        );

        // A second disconnect report changes nothing
        harness.events.clear();
        harness.link("d1", LinkState::Disconnected);
        assert!(harness.events.is_empty());
        assert_eq!(harness.platform.advertising_starts(), 2);
    }

    #[test]
    fn test_failed_status_is_link_loss() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);
        harness.events.clear();

        let device = DeviceId::from("d1");
        harness.with(|m, ctx| {
            m.on_connection_state_change(ctx, device, GattStatus::Failure, LinkState::Connected)
        });

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert_eq!(harness.events[0], PeripheralEvent::Disconnected(DeviceId::from("d1")));
    }

    #[test]
    fn test_abandoned_connect_emits_nothing() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connecting);
        harness.events.clear();

        harness.link("d1", LinkState::Disconnected);

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert_eq!(harness.events, vec![PeripheralEvent::AdvertisingStarted]);
    }

    #[test]
    fn test_powered_off_ignores_links() {
        let mut harness = Harness::new();
        harness.link("d1", LinkState::Connected);
        harness.link("d1", LinkState::Disconnected);

        assert_eq!(harness.manager.state(), &ConnectionState::PoweredOff);
        assert!(harness.platform.cancelled_connections().is_empty());
        assert!(harness.events.is_empty());
    }

    #[test]
    fn test_acks_during_early_connection_still_count() {
        let mut harness = Harness::new();
        harness.manager.begin_power_on();
        let services = ServiceCatalog::nuimo().service_uuids();

        harness
            .with(|m, ctx| m.on_service_added(ctx, services[0], GattStatus::Success))
            .unwrap();
        harness.link("d1", LinkState::Connecting);
        for uuid in &services[1..] {
            harness
                .with(|m, ctx| m.on_service_added(ctx, *uuid, GattStatus::Success))
                .unwrap();
        }
        assert!(harness.manager.all_services_registered());
        assert_eq!(harness.platform.advertising_starts(), 0);

        harness.link("d1", LinkState::Disconnected);

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert_eq!(harness.platform.advertising_starts(), 1);
    }

    #[test]
    fn test_disconnecting_is_link_loss() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);
        harness.events.clear();

        harness.link("d1", LinkState::Disconnecting);

        assert_eq!(harness.manager.state(), &ConnectionState::Advertising);
        assert_eq!(harness.events[0], PeripheralEvent::Disconnected(DeviceId::from("d1")));
    }

    #[test]
    fn test_reset_from_connected() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);
        harness.events.clear();
        harness.platform.take_calls();

        harness.with(|m, ctx| m.reset(ctx));

        assert_eq!(harness.manager.state(), &ConnectionState::PoweredOff);
        assert!(harness.manager.registered_services().is_empty());
        assert_eq!(harness.events, vec![PeripheralEvent::Disconnected(DeviceId::from("d1"))]);
        assert_eq!(
            harness.platform.calls(),
            vec![
                PlatformCall::CancelConnection(DeviceId::from("d1")),
                PlatformCall::ClearServices,
            ]
        );
    }

    #[test]
    fn test_reset_while_advertising() {
        let mut harness = Harness::powered_on();
        harness.platform.take_calls();

        harness.with(|m, ctx| m.reset(ctx));

        assert!(!harness.advertising.is_advertising());
        assert_eq!(
            harness.platform.calls(),
            vec![PlatformCall::StopAdvertising, PlatformCall::ClearServices]
        );
    }

    #[test]
    fn test_mtu_tracks_current_link() {
        let mut harness = Harness::powered_on();
        harness.link("d1", LinkState::Connected);

        harness.manager.on_mtu_changed(&DeviceId::from("d2"), 185);
        assert_eq!(harness.manager.mtu(), None);
        harness.manager.on_mtu_changed(&DeviceId::from("d1"), 185);
        assert_eq!(harness.manager.mtu(), Some(185));

        harness.link("d1", LinkState::Disconnected);
        assert_eq!(harness.manager.mtu(), None);
    }
}
