//! Emulator configuration
//!
//! Defaults reproduce the real device. With the `config-file` feature the
//! configuration can be layered from a TOML file and `NUIMO_*` environment
//! variables (nested keys use `__`, e.g. `NUIMO_ROTATION__MAX_EVENTS_PER_SEC`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::battery::{BatteryReading, BatterySource, FixedBattery, SysfsBattery, POWER_SUPPLY_DIR};
use crate::ble::gatt_service::SENSOR_SERVICE_UUID;
use crate::ble::{AdvertiseMode, AdvertisingParameters, TxPowerLevel};
use crate::input::encoder::{MAX_ROTATION_EVENTS_PER_SEC, SINGLE_ROTATION_VALUE};
use crate::input::InputEventEncoder;
use crate::{EmulatorError, DEVICE_NAME};

/// Longest local name that still fits a legacy advertising packet
/// next to the 128-bit Sensor service UUID
pub const MAX_DEVICE_NAME_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Advertised local name
    pub device_name: String,
    pub advertising: AdvertisingConfig,
    pub rotation: RotationConfig,
    pub battery: BatteryConfig,
    /// Default tracing filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            advertising: AdvertisingConfig::default(),
            rotation: RotationConfig::default(),
            battery: BatteryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    pub mode: AdvertiseMode,
    pub tx_power: TxPowerLevel,
    pub connectable: bool,
    pub include_device_name: bool,
    /// 0 advertises until stopped
    pub timeout_secs: u64,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::Balanced,
            tx_power: TxPowerLevel::Medium,
            connectable: true,
            include_device_name: true,
            timeout_secs: 0,
        }
    }
}

/// Dial tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub max_events_per_sec: u32,
    /// Payload value of one full turn
    pub single_rotation_value: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_events_per_sec: MAX_ROTATION_EVENTS_PER_SEC,
            single_rotation_value: SINGLE_ROTATION_VALUE,
        }
    }
}

/// Where Battery Level reads come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BatteryConfig {
    /// Host battery via sysfs; discovered when `path` is unset
    Sysfs { path: Option<PathBuf> },
    Fixed { level: i32, scale: i32 },
    Unavailable,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig::Sysfs { path: None }
    }
}

impl EmulatorConfig {
    /// Load from an optional file, then `NUIMO_*` environment variables
    #[cfg(feature = "config-file")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, EmulatorError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix("NUIMO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EmulatorError> {
        if self.device_name.trim().is_empty() {
            return Err(EmulatorError::Configuration(
                "device_name must not be empty".to_string(),
            ));
        }
        if self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(EmulatorError::Configuration(format!(
                "device_name {:?} is longer than {} bytes",
                self.device_name, MAX_DEVICE_NAME_LEN
            )));
        }
        if self.rotation.max_events_per_sec == 0 {
            return Err(EmulatorError::Configuration(
                "rotation.max_events_per_sec must be positive".to_string(),
            ));
        }
        if !self.rotation.single_rotation_value.is_finite() || self.rotation.single_rotation_value <= 0.0 {
            return Err(EmulatorError::Configuration(
                "rotation.single_rotation_value must be a positive number".to_string(),
            ));
        }
        if let BatteryConfig::Fixed { scale, .. } = self.battery {
            if scale <= 0 {
                return Err(EmulatorError::Configuration(
                    "battery.scale must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn advertising_parameters(&self) -> AdvertisingParameters {
        AdvertisingParameters {
            local_name: self.device_name.clone(),
            service_uuids: vec![SENSOR_SERVICE_UUID],
            include_device_name: self.advertising.include_device_name,
            connectable: self.advertising.connectable,
            mode: self.advertising.mode,
            tx_power: self.advertising.tx_power,
            timeout: match self.advertising.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn encoder(&self) -> InputEventEncoder {
        InputEventEncoder::new(
            self.rotation.max_events_per_sec,
            self.rotation.single_rotation_value,
        )
    }

    pub fn battery_source(&self) -> Arc<dyn BatterySource> {
        match &self.battery {
            BatteryConfig::Sysfs { path: Some(path) } => Arc::new(SysfsBattery::new(path.clone())),
            BatteryConfig::Sysfs { path: None } => match SysfsBattery::discover(POWER_SUPPLY_DIR) {
                Some(battery) => {
                    tracing::debug!("Using battery at {}", battery.path().display());
                    Arc::new(battery)
                }
                None => {
                    tracing::info!("No host battery found, reporting 0%");
                    Arc::new(FixedBattery::unavailable())
                }
            },
            BatteryConfig::Fixed { level, scale } => {
                Arc::new(FixedBattery(Some(BatteryReading::new(*level, *scale))))
            }
            BatteryConfig::Unavailable => Arc::new(FixedBattery::unavailable()),
        }
    }
}
