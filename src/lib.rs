//! Nuimo peripheral emulator
//!
//! Emulates the Senic Nuimo BLE controller on a host that normally only acts
//! as a central. The GATT server state machine lives here: it advertises the
//! device, accepts a single central, answers reads and writes, tracks
//! notification subscriptions and turns dial input into notifications.
//!
//! Radio I/O is delegated to a [`ble::PlatformStack`] implementation.

pub mod battery;
pub mod ble;
pub mod config;
pub mod input;
pub mod listener;
pub mod peripheral;

pub use ble::{DeviceId, GattStatus, PlatformEvent, PlatformStack};
pub use config::EmulatorConfig;
pub use input::SwipeDirection;
pub use listener::PeripheralListener;
pub use peripheral::{Peripheral, PeripheralSnapshot};

use thiserror::Error;

/// Error types for emulator operations
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("BLE platform error: {0}")]
    Platform(#[from] ble::BleError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[cfg(feature = "config-file")]
impl From<::config::ConfigError> for EmulatorError {
    fn from(err: ::config::ConfigError) -> Self {
        EmulatorError::Configuration(err.to_string())
    }
}

/// Advertised local name of the emulated device
pub const DEVICE_NAME: &str = "Nuimo";
