//! Battery level sampling for the Battery Level characteristic

use std::fs;
use std::path::{Path, PathBuf};

/// Default location of power supplies on Linux
pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// A raw battery reading: `level` out of `scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub level: i32,
    pub scale: i32,
}

impl BatteryReading {
    pub fn new(level: i32, scale: i32) -> Self {
        Self { level, scale }
    }

    /// Battery percentage in `0..=100`, or `None` if the reading is invalid
    pub fn percentage(&self) -> Option<u8> {
        if self.level < 0 || self.scale <= 0 {
            return None;
        }
        let percent = (self.level as f64 / self.scale as f64 * 100.0).round();
        Some(percent.clamp(0.0, 100.0) as u8)
    }
}

/// Percentage reported to the central. Missing or invalid readings are 0.
pub fn battery_percentage(reading: Option<BatteryReading>) -> u8 {
    reading.and_then(|r| r.percentage()).unwrap_or(0)
}

/// Source of host battery readings
pub trait BatterySource: Send + Sync {
    /// Sample the current battery state; `None` if unavailable
    fn sample(&self) -> Option<BatteryReading>;
}

/// Battery source returning a fixed reading
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBattery(pub Option<BatteryReading>);

impl FixedBattery {
    pub fn percent(level: i32) -> Self {
        Self(Some(BatteryReading::new(level, 100)))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl BatterySource for FixedBattery {
    fn sample(&self) -> Option<BatteryReading> {
        self.0
    }
}

/// Battery source backed by a sysfs `capacity` file
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    capacity_path: PathBuf,
}

impl SysfsBattery {
    /// Read from an explicit `capacity` file
    pub fn new(capacity_path: impl Into<PathBuf>) -> Self {
        Self {
            capacity_path: capacity_path.into(),
        }
    }

    /// Find the first supply of type `Battery` under `dir`
    pub fn discover(dir: impl AsRef<Path>) -> Option<Self> {
        let entries = fs::read_dir(dir.as_ref()).ok()?;
        let mut supplies: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        supplies.sort();

        supplies.into_iter().find_map(|supply| {
            let kind = fs::read_to_string(supply.join("type")).ok()?;
            if kind.trim() != "Battery" {
                return None;
            }
            let capacity = supply.join("capacity");
            capacity.exists().then(|| Self::new(capacity))
        })
    }

    pub fn path(&self) -> &Path {
        &self.capacity_path
    }
}

impl BatterySource for SysfsBattery {
    fn sample(&self) -> Option<BatteryReading> {
        match fs::read_to_string(&self.capacity_path) {
            Ok(raw) => match raw.trim().parse::<i32>() {
                Ok(level) => Some(BatteryReading::new(level, 100)),
                Err(e) => {
                    tracing::debug!("Unparseable battery capacity {:?}: {}", raw.trim(), e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!("Battery capacity unavailable at {}: {}", self.capacity_path.display(), e);
                None
            }
        }
    }
}
