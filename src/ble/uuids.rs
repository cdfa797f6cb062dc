//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for probe communication.

use uuid::Uuid;

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (Read). One byte, 0-100 %.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

// Measurement Service (vendor)
/// Probe measurement service UUID.
pub const MEASUREMENT_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x7e57_0100_4c2b_11ee_be56_0242ac120002);
/// Measurement characteristic UUID (Notify). Carries raw measurement frames.
pub const MEASUREMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7e57_0101_4c2b_11ee_be56_0242ac120002);

/// Check if a service UUID is one a probe session talks to.
pub fn is_probe_service(uuid: &Uuid) -> bool {
    *uuid == MEASUREMENT_SERVICE_UUID || *uuid == BATTERY_SERVICE_UUID
}
