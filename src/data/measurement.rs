//! Measurement data structures.
//!
//! Samples carry the value exactly as the probe reported it. Temperatures
//! are in Kelvin; conversion for display lives in [`crate::utils`].

use chrono::{DateTime, Utc};

use crate::utils::kelvin_to_celsius;

/// What a measurement sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MeasurementKind {
    /// Infrared surface temperature.
    SurfaceTemperature = 1,
    /// Plunge (penetration) temperature.
    PlungeTemperature = 2,
    /// Generic contact temperature.
    Temperature = 3,
    /// Relative humidity in percent.
    Humidity = 4,
}

impl MeasurementKind {
    /// Create from the raw kind code. Returns `None` for unknown codes.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SurfaceTemperature),
            2 => Some(Self::PlungeTemperature),
            3 => Some(Self::Temperature),
            4 => Some(Self::Humidity),
            _ => None,
        }
    }

    /// Convert to the raw kind code.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Check if the value of this kind is a temperature in Kelvin.
    pub fn is_temperature(&self) -> bool {
        !matches!(self, Self::Humidity)
    }

    /// Upper-case name used in presentation strings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SurfaceTemperature => "SURFACE_TEMPERATURE",
            Self::PlungeTemperature => "PLUNGE_TEMPERATURE",
            Self::Temperature => "TEMPERATURE",
            Self::Humidity => "HUMIDITY",
        }
    }
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical unit information attached to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicalUnit {
    /// Number of decimals the probe resolves.
    pub precision: u8,
}

impl PhysicalUnit {
    /// Precision used when a probe does not report one.
    pub const DEFAULT_PRECISION: u8 = 1;

    /// Create a unit with the given precision.
    pub fn new(precision: u8) -> Self {
        Self { precision }
    }
}

impl Default for PhysicalUnit {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PRECISION)
    }
}

/// A single decoded measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementSample {
    /// What was measured.
    pub kind: MeasurementKind,
    /// Raw value as reported (Kelvin for temperatures).
    pub raw_value: f32,
    /// Unit information.
    pub unit: PhysicalUnit,
}

impl MeasurementSample {
    /// Create a new sample.
    pub fn new(kind: MeasurementKind, raw_value: f32, unit: PhysicalUnit) -> Self {
        Self {
            kind,
            raw_value,
            unit,
        }
    }

    /// Value converted to Celsius, for temperature kinds.
    pub fn to_celsius(&self) -> Option<f64> {
        self.kind
            .is_temperature()
            .then(|| kelvin_to_celsius(self.raw_value as f64))
    }
}

/// A battery level read from a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryReading {
    /// Battery level in percent (0-100).
    pub level: u8,
    /// When the level was read.
    pub read_at: DateTime<Utc>,
}

impl BatteryReading {
    /// Record a level read now. Values above 100 are clamped.
    pub fn now(level: u8) -> Self {
        Self {
            level: level.min(100),
            read_at: Utc::now(),
        }
    }
}
