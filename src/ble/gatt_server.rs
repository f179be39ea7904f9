//! GATT server protocol types
//!
//! Status codes sent back to the central, link states reported by the
//! platform, and the inbound events a platform stack delivers to the
//! emulator.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::adapter::DeviceId;

/// Status carried in a GATT response.
///
/// Codes follow the ATT error codes used by Android's `BluetoothGatt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
    InvalidOffset,
    InvalidAttributeLength,
    Failure,
}

impl GattStatus {
    /// Numeric status code
    pub fn code(&self) -> u16 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::ReadNotPermitted => 0x02,
            GattStatus::WriteNotPermitted => 0x03,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::InvalidAttributeLength => 0x0d,
            GattStatus::Failure => 0x101,
        }
    }

    /// Map a numeric status code back; unknown codes become `Failure`
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00 => GattStatus::Success,
            0x02 => GattStatus::ReadNotPermitted,
            0x03 => GattStatus::WriteNotPermitted,
            0x06 => GattStatus::RequestNotSupported,
            0x07 => GattStatus::InvalidOffset,
            0x0d => GattStatus::InvalidAttributeLength,
            _ => GattStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GattStatus::Success => "success",
            GattStatus::ReadNotPermitted => "read not permitted",
            GattStatus::WriteNotPermitted => "write not permitted",
            GattStatus::RequestNotSupported => "request not supported",
            GattStatus::InvalidOffset => "invalid offset",
            GattStatus::InvalidAttributeLength => "invalid attribute length",
            GattStatus::Failure => "failure",
        };
        write!(f, "{} (0x{:02x})", name, self.code())
    }
}

/// Link-layer connection state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Reply to a read or write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    pub status: GattStatus,
    pub value: Vec<u8>,
}

impl GattResponse {
    /// Successful response carrying a value
    pub fn success(value: Vec<u8>) -> Self {
        Self {
            status: GattStatus::Success,
            value,
        }
    }

    /// Response with an empty payload
    pub fn status(status: GattStatus) -> Self {
        Self {
            status,
            value: Vec::new(),
        }
    }
}

/// Events delivered by the platform BLE stack.
///
/// Request events carry a `request_id` that must be echoed in the matching
/// [`PlatformStack::send_response`](super::PlatformStack::send_response) call.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// A registered service was acknowledged (or rejected)
    ServiceAdded { service: Uuid, status: GattStatus },

    ConnectionStateChanged {
        device: DeviceId,
        status: GattStatus,
        new_state: LinkState,
    },

    CharacteristicReadRequest {
        device: DeviceId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
    },

    CharacteristicWriteRequest {
        device: DeviceId,
        request_id: u32,
        characteristic: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: u16,
        value: Option<Vec<u8>>,
    },

    DescriptorReadRequest {
        device: DeviceId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
        descriptor: Uuid,
    },

    DescriptorWriteRequest {
        device: DeviceId,
        request_id: u32,
        characteristic: Uuid,
        descriptor: Uuid,
        prepared_write: bool,
        response_needed: bool,
        offset: u16,
        value: Option<Vec<u8>>,
    },

    /// A notification left the radio
    NotificationSent { device: DeviceId, status: GattStatus },

    MtuChanged { device: DeviceId, mtu: u16 },

    /// The platform confirmed advertising is on air
    AdvertisingStarted,

    /// The platform could not start advertising
    AdvertisingFailed { reason: String },
}
