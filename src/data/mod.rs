//! Data structures for probe data.
//!
//! Device identities, decoded measurement samples and battery readings.

pub mod descriptor;
pub mod measurement;

pub use descriptor::{DeviceDescriptor, ProbeType};
pub use measurement::{BatteryReading, MeasurementKind, MeasurementSample, PhysicalUnit};
