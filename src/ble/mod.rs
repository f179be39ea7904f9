//! Bluetooth Low Energy peripheral for the Nuimo emulator
//!
//! GATT catalog, request handling, subscription tracking, advertising and the
//! connection state machine, plus the platform backends that do the radio work.

pub mod adapter;
pub mod advertising;
pub mod connection;
pub mod dispatcher;
pub mod gatt_server;
pub mod gatt_service;
pub mod simulated;
pub mod subscriptions;

#[cfg(all(target_os = "linux", feature = "linux"))]
pub mod linux;

pub use adapter::{
    AdapterInfo, AdvertiseMode, AdvertisingParameters, BleError, Capabilities, DeviceId,
    PlatformStack, TxPowerLevel,
};
pub use advertising::{AdvertisingController, AdvertisingOutcome};
pub use connection::{ConnectionContext, ConnectionManager, ConnectionState};
pub use dispatcher::GattRequestDispatcher;
pub use gatt_server::{GattResponse, GattStatus, LinkState, PlatformEvent};
pub use gatt_service::{CharacteristicDefinition, ServiceCatalog, ServiceDefinition};
pub use simulated::{PlatformCall, SimulatedStack};
pub use subscriptions::SubscriptionRegistry;

#[cfg(all(target_os = "linux", feature = "linux"))]
pub use linux::LinuxStack;
