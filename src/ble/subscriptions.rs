//! Notification subscriptions
//!
//! Tracks which characteristics the connected central enabled through their
//! Client Characteristic Configuration Descriptor.

use std::collections::BTreeSet;
use uuid::Uuid;

use super::gatt_server::GattStatus;
use super::gatt_service::{ServiceCatalog, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};

/// Subscription set of the current connection
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    catalog: ServiceCatalog,
    subscribed: BTreeSet<Uuid>,
}

impl SubscriptionRegistry {
    pub fn new(catalog: ServiceCatalog) -> Self {
        Self {
            catalog,
            subscribed: BTreeSet::new(),
        }
    }

    /// Apply a CCCD write from the central.
    ///
    /// Characteristics without Notify reject with `WriteNotPermitted`; any
    /// value other than the enable/disable markers rejects with
    /// `RequestNotSupported`.
    pub fn on_descriptor_write(&mut self, characteristic: Uuid, value: Option<&[u8]>) -> GattStatus {
        if !self.catalog.supports_notify(&characteristic) {
            return GattStatus::WriteNotPermitted;
        }

        match value {
            Some(v) if v == &ENABLE_NOTIFICATION_VALUE[..] => {
                if self.subscribed.insert(characteristic) {
                    tracing::debug!("Notifications enabled for {}", self.catalog.describe(&characteristic));
                }
                GattStatus::Success
            }
            Some(v) if v == &DISABLE_NOTIFICATION_VALUE[..] => {
                if self.subscribed.remove(&characteristic) {
                    tracing::debug!("Notifications disabled for {}", self.catalog.describe(&characteristic));
                }
                GattStatus::Success
            }
            _ => GattStatus::RequestNotSupported,
        }
    }

    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.subscribed.contains(characteristic)
    }

    /// Subscribed characteristics, ordered by UUID
    pub fn subscribed(&self) -> Vec<Uuid> {
        self.subscribed.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.subscribed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.subscribed.is_empty() {
            tracing::debug!("Clearing {} subscriptions", self.subscribed.len());
        }
        self.subscribed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt_service::*;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(ServiceCatalog::nuimo())
    }

    #[test]
    fn test_enable_and_disable() {
        let mut registry = registry();

        let status = registry.on_descriptor_write(
            SENSOR_BUTTON_CHARACTERISTIC_UUID,
            Some(&ENABLE_NOTIFICATION_VALUE[..]),
        );
        assert_eq!(status, GattStatus::Success);
        assert!(registry.is_subscribed(&SENSOR_BUTTON_CHARACTERISTIC_UUID));

        let status = registry.on_descriptor_write(
            SENSOR_BUTTON_CHARACTERISTIC_UUID,
            Some(&DISABLE_NOTIFICATION_VALUE[..]),
        );
        assert_eq!(status, GattStatus::Success);
        assert!(!registry.is_subscribed(&SENSOR_BUTTON_CHARACTERISTIC_UUID));
    }

    #[test]
    fn test_rejects_non_notify_characteristic() {
        let mut registry = registry();

        let status = registry.on_descriptor_write(
            LED_MATRIX_CHARACTERISTIC_UUID,
            Some(&ENABLE_NOTIFICATION_VALUE[..]),
        );
        assert_eq!(status, GattStatus::WriteNotPermitted);

        let status = registry.on_descriptor_write(Uuid::nil(), Some(&ENABLE_NOTIFICATION_VALUE[..]));
        assert_eq!(status, GattStatus::WriteNotPermitted);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_unknown_value() {
        let mut registry = registry();

        // Indication marker is not supported by the device
        let status = registry.on_descriptor_write(SENSOR_TOUCH_CHARACTERISTIC_UUID, Some(&[0x02, 0x00][..]));
        assert_eq!(status, GattStatus::RequestNotSupported);

        let status = registry.on_descriptor_write(SENSOR_TOUCH_CHARACTERISTIC_UUID, None);
        assert_eq!(status, GattStatus::RequestNotSupported);

        let status = registry.on_descriptor_write(SENSOR_TOUCH_CHARACTERISTIC_UUID, Some(&[0x01][..]));
        assert_eq!(status, GattStatus::RequestNotSupported);
        assert!(!registry.is_subscribed(&SENSOR_TOUCH_CHARACTERISTIC_UUID));
    }

    #[test]
    fn test_clear() {
        let mut registry = registry();
        for uuid in [
            SENSOR_ROTATION_CHARACTERISTIC_UUID,
            SENSOR_BUTTON_CHARACTERISTIC_UUID,
            BATTERY_LEVEL_CHARACTERISTIC_UUID,
        ] {
            registry.on_descriptor_write(uuid, Some(&ENABLE_NOTIFICATION_VALUE[..]));
        }
        assert_eq!(registry.len(), 3);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.subscribed().is_empty());
    }
}
