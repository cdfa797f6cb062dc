//! BLE communication module.
//!
//! Bluetooth Low Energy implementations of [`ProbeScanner`](crate::ProbeScanner)
//! and [`ProbeTransport`](crate::transport::ProbeTransport), built on
//! `btleplug`.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use advertising::ProbeAdvertisement;
pub use characteristics::CharacteristicHandler;
pub use connection::{BleProbeTransport, BleTransportFactory};
pub use scanner::BleScanner;
pub use uuids::*;
