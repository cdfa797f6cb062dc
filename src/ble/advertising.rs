//! Advertising data parsing.
//!
//! Probes identify themselves through their advertised local name,
//! `"<MODEL> <SERIAL>"`, e.g. `"T104-IR 39051234"`.

use btleplug::api::PeripheralProperties;

use crate::data::DeviceDescriptor;

/// A single probe advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAdvertisement {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// Probe identity parsed from the local name.
    pub descriptor: DeviceDescriptor,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl ProbeAdvertisement {
    /// Parse an advertisement from a local name.
    ///
    /// Returns `None` if the name does not belong to a known probe model.
    pub fn parse(identifier: impl Into<String>, local_name: &str, rssi: Option<i16>) -> Option<Self> {
        let descriptor = DeviceDescriptor::from_advertised_name(local_name)?;

        Some(Self {
            identifier: identifier.into(),
            descriptor,
            rssi,
        })
    }

    /// Parse an advertisement from peripheral properties.
    pub fn from_properties(
        identifier: impl Into<String>,
        properties: &PeripheralProperties,
    ) -> Option<Self> {
        let local_name = properties.local_name.as_deref()?;
        Self::parse(identifier, local_name, properties.rssi)
    }

    /// The advertised serial number.
    pub fn serial_number(&self) -> &str {
        self.descriptor.serial_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProbeType;

    #[test]
    fn test_parse_known_models() {
        let adv = ProbeAdvertisement::parse("hci0/dev_1", "T104-IR 39051234", Some(-60)).unwrap();
        assert_eq!(adv.serial_number(), "39051234");
        assert_eq!(adv.descriptor.probe_type(), ProbeType::T104IrBt);
        assert_eq!(adv.rssi, Some(-60));

        let adv = ProbeAdvertisement::parse("id", "QSR-HANDLE 7", None).unwrap();
        assert_eq!(adv.descriptor.probe_type(), ProbeType::QsrHandle);
    }

    #[test]
    fn test_parse_rejects_foreign_devices() {
        assert!(ProbeAdvertisement::parse("id", "JBL Flip 5", None).is_none());
        assert!(ProbeAdvertisement::parse("id", "", None).is_none());
        assert!(ProbeAdvertisement::parse("id", "MF-HANDLE", None).is_none());
    }

    #[test]
    fn test_from_properties() {
        let properties = PeripheralProperties {
            local_name: Some("MF-HANDLE 41234567".to_string()),
            rssi: Some(-80),
            ..Default::default()
        };
        let adv = ProbeAdvertisement::from_properties("id", &properties).unwrap();
        assert_eq!(adv.serial_number(), "41234567");
        assert_eq!(adv.rssi, Some(-80));

        let unnamed = PeripheralProperties::default();
        assert!(ProbeAdvertisement::from_properties("id", &unnamed).is_none());
    }
}
