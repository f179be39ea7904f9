//! Input payload encoding and rotation rate limiting

use std::time::Duration;
use tokio::time::Instant;

use super::{Notification, SwipeDirection};
use crate::ble::gatt_service::{
    SENSOR_BUTTON_CHARACTERISTIC_UUID, SENSOR_ROTATION_CHARACTERISTIC_UUID,
    SENSOR_TOUCH_CHARACTERISTIC_UUID,
};

/// Maximum rotation notifications per second
pub const MAX_ROTATION_EVENTS_PER_SEC: u32 = 10;

/// Payload value of one full turn of the dial
pub const SINGLE_ROTATION_VALUE: f64 = 2800.0;

/// Rotation not yet sent to the central
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationAccumulator {
    accumulated: f64,
    last_emission: Option<Instant>,
}

impl RotationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated turns since the last emitted notification
    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    /// The pending rotation was sent at `now`
    pub fn commit(&mut self, now: Instant) {
        self.accumulated = 0.0;
        self.last_emission = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Encodes input events into sensor characteristic payloads
#[derive(Debug, Clone)]
pub struct InputEventEncoder {
    min_interval: Duration,
    single_rotation_value: f64,
}

impl Default for InputEventEncoder {
    fn default() -> Self {
        Self::new(MAX_ROTATION_EVENTS_PER_SEC, SINGLE_ROTATION_VALUE)
    }
}

impl InputEventEncoder {
    pub fn new(max_events_per_sec: u32, single_rotation_value: f64) -> Self {
        Self {
            min_interval: Duration::from_secs(1) / max_events_per_sec.max(1),
            single_rotation_value,
        }
    }

    /// Minimum gap between two rotation notifications
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// `[1]` pressed, `[0]` released
    pub fn button(&self, pressed: bool) -> Notification {
        Notification {
            characteristic: SENSOR_BUTTON_CHARACTERISTIC_UUID,
            payload: vec![u8::from(pressed)],
        }
    }

    pub fn swipe(&self, direction: SwipeDirection) -> Notification {
        Notification {
            characteristic: SENSOR_TOUCH_CHARACTERISTIC_UUID,
            payload: vec![direction.gatt_value()],
        }
    }

    /// Add `delta` turns and produce a notification if one is due.
    ///
    /// Nothing is cleared here: the caller commits the accumulator once the
    /// notification has actually been sent, so a failed send keeps the
    /// rotation for the next attempt.
    pub fn rotation(
        &self,
        accumulator: &mut RotationAccumulator,
        delta: f64,
        now: Instant,
    ) -> Option<Notification> {
        if delta.is_finite() {
            accumulator.accumulated += delta;
        } else {
            tracing::warn!("Ignoring non-finite rotation delta {}", delta);
        }

        if accumulator.accumulated == 0.0 {
            return None;
        }
        if let Some(last) = accumulator.last_emission {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }

        let value = (self.single_rotation_value * accumulator.accumulated)
            .round()
            .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        Some(Notification {
            characteristic: SENSOR_ROTATION_CHARACTERISTIC_UUID,
            payload: value.to_le_bytes().to_vec(),
        })
    }
}
