//! GATT request handling
//!
//! Answers characteristic and descriptor reads/writes from the central
//! according to the service catalog.

use std::sync::Arc;
use uuid::Uuid;

use super::gatt_server::{GattResponse, GattStatus};
use super::gatt_service::{
    ServiceCatalog, BATTERY_LEVEL_CHARACTERISTIC_UUID, CCCD_UUID, LED_MATRIX_CHARACTERISTIC_UUID,
    LED_MATRIX_PAYLOAD_LEN,
};
use super::subscriptions::SubscriptionRegistry;
use crate::battery::{battery_percentage, BatterySource};

/// Routes read/write requests to their handlers
pub struct GattRequestDispatcher {
    catalog: ServiceCatalog,
    battery: Arc<dyn BatterySource>,
}

impl GattRequestDispatcher {
    pub fn new(catalog: ServiceCatalog, battery: Arc<dyn BatterySource>) -> Self {
        Self { catalog, battery }
    }

    /// Only Battery Level yields data; every other read is refused.
    pub fn on_characteristic_read(&self, characteristic: Uuid) -> GattResponse {
        if characteristic == BATTERY_LEVEL_CHARACTERISTIC_UUID {
            let level = battery_percentage(self.battery.sample());
            tracing::debug!("Battery level read: {}%", level);
            GattResponse::success(vec![level])
        } else {
            tracing::debug!("Read refused for {}", self.catalog.describe(&characteristic));
            GattResponse::status(GattStatus::ReadNotPermitted)
        }
    }

    /// Only the LED matrix accepts writes.
    ///
    /// The matrix protocol always expects an acknowledgement, so a write
    /// without response is refused before the payload is looked at. The
    /// payload content itself is not interpreted here.
    pub fn on_characteristic_write(
        &self,
        characteristic: Uuid,
        value: Option<&[u8]>,
        offset: u16,
        response_required: bool,
    ) -> GattResponse {
        if characteristic != LED_MATRIX_CHARACTERISTIC_UUID {
            tracing::debug!("Write refused for {}", self.catalog.describe(&characteristic));
            return GattResponse::status(GattStatus::WriteNotPermitted);
        }

        let status = match value {
            _ if !response_required => GattStatus::RequestNotSupported,
            Some(v) if v.len() == LED_MATRIX_PAYLOAD_LEN => {
                if offset != 0 {
                    GattStatus::InvalidOffset
                } else {
                    GattStatus::Success
                }
            }
            _ => GattStatus::InvalidAttributeLength,
        };

        if !status.is_success() {
            tracing::warn!(
                "LED matrix write rejected: {} ({} bytes, offset {}, response {})",
                status,
                value.map(|v| v.len()).unwrap_or(0),
                offset,
                response_required
            );
        }
        GattResponse::status(status)
    }

    /// The CCCD carries write permission only
    pub fn on_descriptor_read(&self, characteristic: Uuid, descriptor: Uuid) -> GattResponse {
        tracing::debug!(
            "Descriptor read refused for {} / {}",
            self.catalog.describe(&characteristic),
            descriptor
        );
        GattResponse::status(GattStatus::ReadNotPermitted)
    }

    /// CCCD writes update the subscription set
    pub fn on_descriptor_write(
        &self,
        subscriptions: &mut SubscriptionRegistry,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Option<&[u8]>,
    ) -> GattResponse {
        if descriptor != CCCD_UUID {
            return GattResponse::status(GattStatus::WriteNotPermitted);
        }
        let status = subscriptions.on_descriptor_write(characteristic, value);
        if !status.is_success() {
            tracing::warn!(
                "Descriptor write rejected for {}: {}",
                self.catalog.describe(&characteristic),
                status
            );
        }
        GattResponse::status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{BatteryReading, FixedBattery};
    use crate::ble::gatt_service::*;

    fn dispatcher(battery: FixedBattery) -> GattRequestDispatcher {
        GattRequestDispatcher::new(ServiceCatalog::nuimo(), Arc::new(battery))
    }

    #[test]
    fn test_battery_read() {
        let response = dispatcher(FixedBattery::percent(73))
            .on_characteristic_read(BATTERY_LEVEL_CHARACTERISTIC_UUID);
        assert_eq!(response, GattResponse::success(vec![73]));

        let response = dispatcher(FixedBattery(Some(BatteryReading::new(3, 4))))
            .on_characteristic_read(BATTERY_LEVEL_CHARACTERISTIC_UUID);
        assert_eq!(response.value, vec![75]);
    }

    #[test]
    fn test_battery_read_unavailable_is_zero() {
        let response = dispatcher(FixedBattery::unavailable())
            .on_characteristic_read(BATTERY_LEVEL_CHARACTERISTIC_UUID);
        assert_eq!(response.status, GattStatus::Success);
        assert_eq!(response.value, vec![0]);
    }

    #[test]
    fn test_other_reads_refused() {
        let dispatcher = dispatcher(FixedBattery::percent(50));
        for uuid in [
            DEVICE_INFORMATION_CHARACTERISTIC_UUID,
            SENSOR_BUTTON_CHARACTERISTIC_UUID,
            LED_MATRIX_CHARACTERISTIC_UUID,
            Uuid::nil(),
        ] {
            let response = dispatcher.on_characteristic_read(uuid);
            assert_eq!(response.status, GattStatus::ReadNotPermitted);
            assert!(response.value.is_empty());
        }
    }

    #[test]
    fn test_led_matrix_write_validation_order() {
        let dispatcher = dispatcher(FixedBattery::unavailable());
        let led = LED_MATRIX_CHARACTERISTIC_UUID;
        let valid = [0u8; 13];
        let short = [0u8; 12];

        // No response requested wins over every other problem
        let response = dispatcher.on_characteristic_write(led, Some(&short[..]), 5, false);
        assert_eq!(response.status, GattStatus::RequestNotSupported);

        // Length is checked before offset
        let response = dispatcher.on_characteristic_write(led, Some(&short[..]), 5, true);
        assert_eq!(response.status, GattStatus::InvalidAttributeLength);

        let response = dispatcher.on_characteristic_write(led, None, 0, true);
        assert_eq!(response.status, GattStatus::InvalidAttributeLength);

        let response = dispatcher.on_characteristic_write(led, Some(&valid[..]), 1, true);
        assert_eq!(response.status, GattStatus::InvalidOffset);

        let response = dispatcher.on_characteristic_write(led, Some(&valid[..]), 0, true);
        assert_eq!(response, GattResponse::status(GattStatus::Success));
    }

    #[test]
    fn test_other_writes_refused() {
        let dispatcher = dispatcher(FixedBattery::unavailable());
        let response = dispatcher.on_characteristic_write(
            BATTERY_LEVEL_CHARACTERISTIC_UUID,
            Some(&[1u8][..]),
            0,
            true,
        );
        assert_eq!(response.status, GattStatus::WriteNotPermitted);
    }

    #[test]
    fn test_descriptor_requests() {
        let dispatcher = dispatcher(FixedBattery::unavailable());
        let mut subscriptions = SubscriptionRegistry::new(ServiceCatalog::nuimo());

        let response = dispatcher.on_descriptor_write(
            &mut subscriptions,
            SENSOR_ROTATION_CHARACTERISTIC_UUID,
            CCCD_UUID,
            Some(&ENABLE_NOTIFICATION_VALUE[..]),
        );
        assert_eq!(response.status, GattStatus::Success);
        assert!(subscriptions.is_subscribed(&SENSOR_ROTATION_CHARACTERISTIC_UUID));

        let response = dispatcher.on_descriptor_write(
            &mut subscriptions,
            SENSOR_TOUCH_CHARACTERISTIC_UUID,
            Uuid::nil(),
            Some(&ENABLE_NOTIFICATION_VALUE[..]),
        );
        assert_eq!(response.status, GattStatus::WriteNotPermitted);

        let response =
            dispatcher.on_descriptor_read(SENSOR_ROTATION_CHARACTERISTIC_UUID, CCCD_UUID);
        assert_eq!(response.status, GattStatus::ReadNotPermitted);
    }
}
