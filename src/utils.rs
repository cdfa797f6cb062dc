//! Unit conversion and presentation helpers.
//!
//! Decoded samples stay in the unit the probe reported. Everything here is
//! for display only.

use crate::data::{DeviceDescriptor, MeasurementSample};

/// Offset between the Kelvin and Celsius scales.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Convert Kelvin to Celsius.
///
/// # Example
///
/// ```
/// use probe_link_ble::kelvin_to_celsius;
///
/// let celsius = kelvin_to_celsius(300.0);
/// assert!((celsius - 26.85).abs() < 0.001);
/// ```
#[inline]
pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

/// Convert Celsius to Kelvin.
#[inline]
pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + KELVIN_OFFSET
}

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use probe_link_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Format a sample as a single console line.
///
/// Temperatures are shown in Celsius with the probe's precision, e.g.
/// `<MF_HANDLE SN1,MF_HANDLE TEMPERATURE: 26.85 >`.
pub fn format_measurement(descriptor: &DeviceDescriptor, sample: &MeasurementSample) -> String {
    let precision = sample.unit.precision as usize;
    let value = sample
        .to_celsius()
        .unwrap_or_else(|| sample.raw_value as f64);

    format!(
        "<{} {} {}: {:.*} >",
        descriptor.probe_type(),
        device_label(descriptor),
        sample.kind,
        precision,
        value
    )
}

/// Format the line printed once a session is up.
///
/// e.g. `<create MF_HANDLE SN1,MF_HANDLE Battery level: 85 %>`
pub fn format_battery(descriptor: &DeviceDescriptor, level: u8) -> String {
    format!(
        "<create {} {} Battery level: {} %>",
        descriptor.probe_type(),
        device_label(descriptor),
        level
    )
}

/// `serial,TYPE` label identifying a device in console output.
pub fn device_label(descriptor: &DeviceDescriptor) -> String {
    format!("{},{}", descriptor.serial_number(), descriptor.probe_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MeasurementKind, PhysicalUnit, ProbeType};

    #[test]
    fn test_kelvin_to_celsius() {
        assert!((kelvin_to_celsius(273.15) - 0.0).abs() < 0.001);
        assert!((kelvin_to_celsius(373.15) - 100.0).abs() < 0.001);
        assert!((kelvin_to_celsius(0.0) - (-273.15)).abs() < 0.001);
    }

    #[test]
    fn test_kelvin_roundtrip() {
        let original = 63.5;
        let converted = kelvin_to_celsius(celsius_to_kelvin(original));
        assert!((converted - original).abs() < 0.0001);
    }

    #[test]
    fn test_celsius_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_format_measurement() {
        let descriptor = DeviceDescriptor::new("SN1", ProbeType::MfHandle);
        let sample = MeasurementSample::new(MeasurementKind::Temperature, 300.0, PhysicalUnit::new(2));
        assert_eq!(
            format_measurement(&descriptor, &sample),
            "<MF_HANDLE SN1,MF_HANDLE TEMPERATURE: 26.85 >"
        );

        let sample = MeasurementSample::new(MeasurementKind::Humidity, 45.0, PhysicalUnit::new(0));
        assert_eq!(
            format_measurement(&descriptor, &sample),
            "<MF_HANDLE SN1,MF_HANDLE HUMIDITY: 45 >"
        );
    }

    #[test]
    fn test_format_battery() {
        let descriptor = DeviceDescriptor::new("SN7", ProbeType::T104IrBt);
        assert_eq!(
            format_battery(&descriptor, 85),
            "<create T104_IR_BT SN7,T104_IR_BT Battery level: 85 %>"
        );
    }
}
