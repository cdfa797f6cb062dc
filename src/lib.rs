// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # probe-link-ble
//!
//! A cross-platform Rust library for discovering Bluetooth measurement
//! probes, holding sessions to them and streaming decoded measurements to
//! subscribers.
//!
//! Supported probe models are the T104 infrared/plunge thermometer
//! (`T104-IR`) and the multifunction and QSR temperature handles
//! (`MF-HANDLE`, `QSR-HANDLE`).
//!
//! ## Features
//!
//! - **Probe Discovery**: Time-bounded scans that report each probe once
//! - **Sessions**: One session per probe serial number, with battery and availability queries
//! - **Measurements**: Per-kind subscriptions, delivered in arrival order
//! - **Multi-probe Support**: Connect and disconnect many probes in parallel
//! - **Mock transport**: Exercise everything without Bluetooth hardware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use probe_link_ble::ble::BleScanner;
//! use probe_link_ble::config::ProbeLinkConfig;
//! use probe_link_ble::{DiscoveryService, MeasurementKind, Result, SessionRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ProbeLinkConfig::default();
//!     let scanner = Arc::new(BleScanner::new().await?);
//!     let factory = Arc::new(scanner.transport_factory());
//!
//!     let discovery = DiscoveryService::new(scanner, config.discovery.clone());
//!     let registry = SessionRegistry::new(factory, config.registry, config.session);
//!
//!     for descriptor in discovery.collect_scan(Duration::from_secs(5)).await {
//!         let session = registry.create_session(&descriptor).await?;
//!         println!("{} battery: {}%", descriptor, session.battery_level().await?);
//!
//!         session.subscribe(MeasurementKind::Temperature, |sample| {
//!             println!("{:?}: {:?} °C", sample.kind, sample.to_celsius());
//!         })?;
//!     }
//!
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     registry.disconnect_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod discovery;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod utils;

// Re-exports for convenience
pub use config::{ProbeLinkConfig, MAX_SESSIONS};
pub use discovery::{DiscoveryService, ProbeScanner};
pub use error::{Error, Result};
pub use registry::{DisconnectReport, SessionRegistry};
pub use session::{
    CallbackHandle, CloseReason, ConnectionState, MeasurementCallback, ProbeSession,
    SessionEvent, SessionEventKind, SubscriptionId,
};
pub use transport::{ProbeTransport, TransportFactory};
pub use utils::{celsius_to_fahrenheit, fahrenheit_to_celsius, kelvin_to_celsius};

// Re-export commonly used types from submodules
pub use data::{
    BatteryReading, DeviceDescriptor, MeasurementKind, MeasurementSample, PhysicalUnit, ProbeType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SessionRegistry>();
        let _ = std::any::TypeId::of::<ProbeSession>();
        let _ = std::any::TypeId::of::<DiscoveryService>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<DeviceDescriptor>();
        let _ = std::any::TypeId::of::<MeasurementSample>();
        let _ = std::any::TypeId::of::<ConnectionState>();
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((kelvin_to_celsius(300.0) - 26.85).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }
}
