//! Platform-agnostic BLE stack interface
//!
//! The emulator decides what to advertise, notify and respond. A platform
//! backend implementing [`PlatformStack`] does the actual radio work and
//! reports back through [`PlatformEvent`](super::PlatformEvent)s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::gatt_server::GattStatus;
use super::gatt_service::ServiceDefinition;

/// Identity of a remote central (Bluetooth address or platform handle)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Optional platform handles. Any missing handle makes power-on fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A Bluetooth adapter exists
    pub adapter: bool,
    /// The adapter supports LE advertising
    pub advertiser: bool,
    /// A GATT server could be opened
    pub gatt_server: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            adapter: true,
            advertiser: true,
            gatt_server: true,
        }
    }

    pub fn none() -> Self {
        Self {
            adapter: false,
            advertiser: false,
            gatt_server: false,
        }
    }

    /// Name of the first missing handle, if any
    pub fn missing(&self) -> Option<&'static str> {
        if !self.adapter {
            Some("bluetooth adapter")
        } else if !self.advertiser {
            Some("LE advertiser")
        } else if !self.gatt_server {
            Some("GATT server")
        } else {
            None
        }
    }
}

/// Advertising interval trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Advertising transmit power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

impl TxPowerLevel {
    /// Nominal transmit power in dBm
    pub fn dbm(&self) -> i16 {
        match self {
            TxPowerLevel::UltraLow => -21,
            TxPowerLevel::Low => -15,
            TxPowerLevel::Medium => -7,
            TxPowerLevel::High => 1,
        }
    }
}

/// What to put on air when advertising
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisingParameters {
    /// Local name of the device
    pub local_name: String,
    /// Advertised service UUIDs
    pub service_uuids: Vec<Uuid>,
    pub include_device_name: bool,
    pub connectable: bool,
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    /// `None` advertises until stopped
    pub timeout: Option<Duration>,
}

/// Information about the BLE adapter
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Platform name (e.g., "Linux", "Simulated")
    pub platform: String,
    /// Adapter name or identifier
    pub name: String,
    /// Adapter address
    pub address: String,
    /// Whether the adapter is powered on
    pub powered: bool,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - {} - Powered: {}",
            self.name, self.platform, self.address, self.powered
        )
    }
}

/// Outbound primitives of a platform BLE stack.
///
/// Every method is fire-and-forget: it must return promptly without waiting
/// for the radio, since the emulator calls these while holding its state
/// lock. Completion is reported later through platform events.
pub trait PlatformStack: Send + Sync {
    /// Which optional handles this platform provides
    fn capabilities(&self) -> Capabilities;

    /// Whether the radio is currently usable
    fn is_radio_available(&self) -> bool;

    /// Set the adapter name seen by centrals
    fn set_device_name(&self, name: &str) -> Result<(), BleError>;

    /// Register a primary service; acknowledged by a `ServiceAdded` event
    fn register_service(&self, service: &ServiceDefinition) -> Result<(), BleError>;

    /// Remove every registered service
    fn clear_services(&self);

    fn start_advertising(&self, parameters: &AdvertisingParameters) -> Result<(), BleError>;

    fn stop_advertising(&self);

    /// Answer a read/write request identified by `request_id`
    fn send_response(
        &self,
        device: &DeviceId,
        request_id: u32,
        status: GattStatus,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Push a notification (unacknowledged) to the central
    fn notify_characteristic_changed(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Drop or refuse the link with `device`
    fn cancel_connection(&self, device: &DeviceId);

    /// Get adapter information (platform-specific details)
    fn adapter_info(&self) -> AdapterInfo;
}

/// BLE-specific error types
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("BLE advertising failed: {0}")]
    AdvertisingFailed(String),

    #[error("Service registration failed: {0}")]
    ServiceRegistrationFailed(String),

    #[error("BLE transmission failed: {0}")]
    TransmissionFailed(String),

    #[error("No pending request {0}")]
    UnknownRequest(u32),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Platform error: {0}")]
    PlatformError(String),
}
