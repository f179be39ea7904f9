//! Unit tests for the Nuimo emulator building blocks

#[cfg(test)]
mod catalog_tests {
    use nuimo_emulator::ble::gatt_service::*;

    #[test]
    fn test_service_order_and_uuids() {
        let catalog = ServiceCatalog::nuimo();
        assert_eq!(
            catalog.service_uuids(),
            vec![
                BATTERY_SERVICE_UUID,
                DEVICE_INFORMATION_SERVICE_UUID,
                LED_MATRIX_SERVICE_UUID,
                SENSOR_SERVICE_UUID,
            ]
        );
        assert_eq!(
            SENSOR_SERVICE_UUID.to_string(),
            "f29b1525-cb19-40f3-be5c-7241ecb82fd2"
        );
        assert_eq!(
            BATTERY_LEVEL_CHARACTERISTIC_UUID.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_sensor_characteristics() {
        let catalog = ServiceCatalog::nuimo();
        let sensor = catalog.service(&SENSOR_SERVICE_UUID).unwrap();
        let uuids: Vec<_> = sensor.characteristics.iter().map(|c| c.uuid).collect();
        assert_eq!(
            uuids,
            vec![
                SENSOR_FLY_CHARACTERISTIC_UUID,
                SENSOR_TOUCH_CHARACTERISTIC_UUID,
                SENSOR_ROTATION_CHARACTERISTIC_UUID,
                SENSOR_BUTTON_CHARACTERISTIC_UUID,
            ]
        );
        for characteristic in sensor.characteristics {
            assert!(characteristic.properties.notify);
            let descriptors = characteristic.descriptors();
            assert_eq!(descriptors.len(), 1);
            assert_eq!(descriptors[0].uuid, CCCD_UUID);
        }
    }

    #[test]
    fn test_notify_support() {
        let catalog = ServiceCatalog::nuimo();
        assert!(catalog.supports_notify(&BATTERY_LEVEL_CHARACTERISTIC_UUID));
        assert!(!catalog.supports_notify(&LED_MATRIX_CHARACTERISTIC_UUID));
        assert!(!catalog.supports_notify(&DEVICE_INFORMATION_CHARACTERISTIC_UUID));
        assert!(catalog.characteristic_by_name("ROTATION").is_some());
    }
}

#[cfg(test)]
mod status_tests {
    use nuimo_emulator::GattStatus;

    #[test]
    fn test_codes_round_trip_for_known_statuses() {
        for status in [
            GattStatus::Success,
            GattStatus::ReadNotPermitted,
            GattStatus::WriteNotPermitted,
            GattStatus::RequestNotSupported,
            GattStatus::InvalidOffset,
            GattStatus::InvalidAttributeLength,
            GattStatus::Failure,
        ] {
            assert_eq!(GattStatus::from_code(status.code()), status);
        }
        assert_eq!(GattStatus::Failure.code(), 0x101);
    }
}

#[cfg(test)]
mod battery_tests {
    use nuimo_emulator::battery::{battery_percentage, BatteryReading, BatterySource, SysfsBattery};

    #[test]
    fn test_percentage_of_scale() {
        assert_eq!(battery_percentage(Some(BatteryReading::new(128, 255))), 50);
        assert_eq!(battery_percentage(Some(BatteryReading::new(0, 100))), 0);
    }

    #[test]
    fn test_sysfs_capacity_file() {
        let dir = tempfile::tempdir().unwrap();
        let capacity = dir.path().join("capacity");
        std::fs::write(&capacity, "42").unwrap();

        let battery = SysfsBattery::new(&capacity);
        assert_eq!(battery.sample(), Some(BatteryReading::new(42, 100)));
    }
}

#[cfg(test)]
mod encoder_tests {
    use nuimo_emulator::ble::gatt_service::SENSOR_ROTATION_CHARACTERISTIC_UUID;
    use nuimo_emulator::input::{InputEventEncoder, RotationAccumulator};
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_rotation_waits_for_interval() {
        let encoder = InputEventEncoder::default();
        let mut accumulator = RotationAccumulator::new();
        let start = Instant::now();

        let first = encoder.rotation(&mut accumulator, 0.05, start).unwrap();
        assert_eq!(first.characteristic, SENSOR_ROTATION_CHARACTERISTIC_UUID);
        accumulator.commit(start);

        let early = start + Duration::from_millis(99);
        assert!(encoder.rotation(&mut accumulator, 0.05, early).is_none());

        let due = start + Duration::from_millis(100);
        let second = encoder.rotation(&mut accumulator, 0.0, due).unwrap();
        assert_eq!(second.payload, vec![140, 0]);
    }
}
