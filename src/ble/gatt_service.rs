//! GATT service catalog for the emulated Nuimo
//!
//! Static description of the four services the device exposes, their
//! characteristics and the property/permission flags of each.

use serde::Serialize;
use uuid::Uuid;

/// Battery service
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
/// Device information service
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
/// LED matrix service
pub const LED_MATRIX_SERVICE_UUID: Uuid = Uuid::from_u128(0xf29b1523_cb19_40f3_be5c_7241ecb82fd1);
/// Sensor service (also the advertised service)
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0xf29b1525_cb19_40f3_be5c_7241ecb82fd2);

/// Characteristic UUIDs
pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const DEVICE_INFORMATION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
pub const LED_MATRIX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf29b1524_cb19_40f3_be5c_7241ecb82fd1);
pub const SENSOR_FLY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf29b1526_cb19_40f3_be5c_7241ecb82fd2);
pub const SENSOR_TOUCH_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf29b1527_cb19_40f3_be5c_7241ecb82fd2);
pub const SENSOR_ROTATION_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf29b1528_cb19_40f3_be5c_7241ecb82fd2);
pub const SENSOR_BUTTON_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf29b1529_cb19_40f3_be5c_7241ecb82fd2);

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value a central writes to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value a central writes to disable notifications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Exact payload length accepted by the LED matrix characteristic
pub const LED_MATRIX_PAYLOAD_LEN: usize = 13;

/// Characteristic properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub const READ: Self = Self { read: true, write: false, notify: false };
    pub const WRITE: Self = Self { read: false, write: true, notify: false };
    pub const NOTIFY: Self = Self { read: false, write: false, notify: true };
    pub const READ_NOTIFY: Self = Self { read: true, write: false, notify: true };
}

/// Characteristic access permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CharacteristicPermissions {
    pub readable: bool,
    pub writable: bool,
}

impl CharacteristicPermissions {
    pub const READ: Self = Self { readable: true, writable: false };
    pub const WRITE: Self = Self { readable: false, writable: true };
}

/// Descriptor definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorDefinition {
    pub uuid: Uuid,
    pub permissions: CharacteristicPermissions,
}

/// Characteristic definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    /// Characteristic UUID
    pub uuid: Uuid,
    /// Short name used in logs and the command line
    pub name: &'static str,
    pub properties: CharacteristicProperties,
    pub permissions: CharacteristicPermissions,
}

impl CharacteristicDefinition {
    /// Descriptors attached to this characteristic.
    ///
    /// Notify-capable characteristics carry exactly one CCCD with write
    /// permission; all others carry none.
    pub fn descriptors(&self) -> Vec<DescriptorDefinition> {
        if self.properties.notify {
            vec![DescriptorDefinition {
                uuid: CCCD_UUID,
                permissions: CharacteristicPermissions::WRITE,
            }]
        } else {
            Vec::new()
        }
    }
}

/// GATT service definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Service UUID
    pub uuid: Uuid,
    pub name: &'static str,
    /// Characteristics in declaration order
    pub characteristics: &'static [CharacteristicDefinition],
}

static BATTERY_CHARACTERISTICS: [CharacteristicDefinition; 1] = [CharacteristicDefinition {
    uuid: BATTERY_LEVEL_CHARACTERISTIC_UUID,
    name: "battery_level",
    properties: CharacteristicProperties::READ_NOTIFY,
    permissions: CharacteristicPermissions::READ,
}];

static DEVICE_INFORMATION_CHARACTERISTICS: [CharacteristicDefinition; 1] =
    [CharacteristicDefinition {
        uuid: DEVICE_INFORMATION_CHARACTERISTIC_UUID,
        name: "device_info",
        properties: CharacteristicProperties::READ,
        permissions: CharacteristicPermissions::READ,
    }];

static LED_MATRIX_CHARACTERISTICS: [CharacteristicDefinition; 1] = [CharacteristicDefinition {
    uuid: LED_MATRIX_CHARACTERISTIC_UUID,
    name: "led_matrix",
    properties: CharacteristicProperties::WRITE,
    permissions: CharacteristicPermissions::WRITE,
}];

static SENSOR_CHARACTERISTICS: [CharacteristicDefinition; 4] = [
    CharacteristicDefinition {
        uuid: SENSOR_FLY_CHARACTERISTIC_UUID,
        name: "fly",
        properties: CharacteristicProperties::NOTIFY,
        permissions: CharacteristicPermissions::READ,
    },
    CharacteristicDefinition {
        uuid: SENSOR_TOUCH_CHARACTERISTIC_UUID,
        name: "touch",
        properties: CharacteristicProperties::NOTIFY,
        permissions: CharacteristicPermissions::READ,
    },
    CharacteristicDefinition {
        uuid: SENSOR_ROTATION_CHARACTERISTIC_UUID,
        name: "rotation",
        properties: CharacteristicProperties::NOTIFY,
        permissions: CharacteristicPermissions::READ,
    },
    CharacteristicDefinition {
        uuid: SENSOR_BUTTON_CHARACTERISTIC_UUID,
        name: "button",
        properties: CharacteristicProperties::NOTIFY,
        permissions: CharacteristicPermissions::READ,
    },
];

/// Services of the Nuimo, in registration order
pub static NUIMO_SERVICES: [ServiceDefinition; 4] = [
    ServiceDefinition {
        uuid: BATTERY_SERVICE_UUID,
        name: "battery",
        characteristics: &BATTERY_CHARACTERISTICS,
    },
    ServiceDefinition {
        uuid: DEVICE_INFORMATION_SERVICE_UUID,
        name: "device_information",
        characteristics: &DEVICE_INFORMATION_CHARACTERISTICS,
    },
    ServiceDefinition {
        uuid: LED_MATRIX_SERVICE_UUID,
        name: "led_matrix",
        characteristics: &LED_MATRIX_CHARACTERISTICS,
    },
    ServiceDefinition {
        uuid: SENSOR_SERVICE_UUID,
        name: "sensor",
        characteristics: &SENSOR_CHARACTERISTICS,
    },
];

/// Read-only lookup over a fixed set of service definitions
#[derive(Debug, Clone, Copy)]
pub struct ServiceCatalog {
    services: &'static [ServiceDefinition],
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::nuimo()
    }
}

impl ServiceCatalog {
    /// Catalog of the emulated Nuimo
    pub fn nuimo() -> Self {
        Self {
            services: &NUIMO_SERVICES,
        }
    }

    /// All services in registration order
    pub fn services(&self) -> &'static [ServiceDefinition] {
        self.services
    }

    /// Number of declared services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|s| s.uuid).collect()
    }

    /// Get service by UUID
    pub fn service(&self, uuid: &Uuid) -> Option<&'static ServiceDefinition> {
        self.services.iter().find(|s| &s.uuid == uuid)
    }

    /// Get characteristic by UUID together with its owning service
    pub fn characteristic(
        &self,
        uuid: &Uuid,
    ) -> Option<(&'static ServiceDefinition, &'static CharacteristicDefinition)> {
        self.services.iter().find_map(|service| {
            service
                .characteristics
                .iter()
                .find(|c| &c.uuid == uuid)
                .map(|c| (service, c))
        })
    }

    /// Get characteristic by its short name (`"button"`, `"led_matrix"`, ...)
    pub fn characteristic_by_name(&self, name: &str) -> Option<&'static CharacteristicDefinition> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether the characteristic exists and declares the Notify property
    pub fn supports_notify(&self, uuid: &Uuid) -> bool {
        self.characteristic(uuid)
            .map(|(_, c)| c.properties.notify)
            .unwrap_or(false)
    }

    /// Short name for logs, falling back to the UUID itself
    pub fn describe(&self, uuid: &Uuid) -> String {
        match self.characteristic(uuid) {
            Some((_, c)) => c.name.to_string(),
            None => uuid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_layout() {
        let catalog = ServiceCatalog::nuimo();
        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.service_uuids(),
            vec![
                BATTERY_SERVICE_UUID,
                DEVICE_INFORMATION_SERVICE_UUID,
                LED_MATRIX_SERVICE_UUID,
                SENSOR_SERVICE_UUID
            ]
        );

        let sensor = catalog.service(&SENSOR_SERVICE_UUID).unwrap();
        let names: Vec<&str> = sensor.characteristics.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["fly", "touch", "rotation", "button"]);
    }

    #[test]
    fn test_uuid_strings_match_device() {
        assert_eq!(
            LED_MATRIX_CHARACTERISTIC_UUID.to_string(),
            "f29b1524-cb19-40f3-be5c-7241ecb82fd1"
        );
        assert_eq!(
            SENSOR_BUTTON_CHARACTERISTIC_UUID.to_string(),
            "f29b1529-cb19-40f3-be5c-7241ecb82fd2"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_notify_characteristics_carry_cccd() {
        let catalog = ServiceCatalog::nuimo();
        for service in catalog.services() {
            for c in service.characteristics {
                let descriptors = c.descriptors();
                if c.properties.notify {
                    assert_eq!(descriptors.len(), 1, "{} should carry a CCCD", c.name);
                    assert_eq!(descriptors[0].uuid, CCCD_UUID);
                    assert!(descriptors[0].permissions.writable);
                    assert!(!descriptors[0].permissions.readable);
                } else {
                    assert!(descriptors.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_lookup() {
        let catalog = ServiceCatalog::nuimo();
        let (service, battery) = catalog
            .characteristic(&BATTERY_LEVEL_CHARACTERISTIC_UUID)
            .unwrap();
        assert_eq!(service.uuid, BATTERY_SERVICE_UUID);
        assert_eq!(battery.properties, CharacteristicProperties::READ_NOTIFY);

        assert!(catalog.supports_notify(&SENSOR_ROTATION_CHARACTERISTIC_UUID));
        assert!(!catalog.supports_notify(&LED_MATRIX_CHARACTERISTIC_UUID));
        assert!(!catalog.supports_notify(&Uuid::nil()));

        assert_eq!(
            catalog.characteristic_by_name("Button").map(|c| c.uuid),
            Some(SENSOR_BUTTON_CHARACTERISTIC_UUID)
        );
        assert!(catalog.characteristic_by_name("volume").is_none());
    }
}
