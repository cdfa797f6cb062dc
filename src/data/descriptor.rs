//! Probe identity data structures.

use crate::data::MeasurementKind;

/// Probe model reported by a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProbeType {
    /// T104 infrared / plunge thermometer with Bluetooth.
    T104IrBt,
    /// Multifunction handle (temperature).
    MfHandle,
    /// Quick-service-restaurant handle (temperature).
    QsrHandle,
    /// A probe this crate cannot decode measurements for.
    Unknown,
}

impl ProbeType {
    /// All known probe types, in a stable order.
    pub const KNOWN: [ProbeType; 3] = [Self::T104IrBt, Self::MfHandle, Self::QsrHandle];

    /// Stable name of the probe type, e.g. `"MF_HANDLE"`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::T104IrBt => "T104_IR_BT",
            Self::MfHandle => "MF_HANDLE",
            Self::QsrHandle => "QSR_HANDLE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Model token a probe of this type advertises in its local name.
    pub fn model_token(&self) -> Option<&'static str> {
        match self {
            Self::T104IrBt => Some("T104-IR"),
            Self::MfHandle => Some("MF-HANDLE"),
            Self::QsrHandle => Some("QSR-HANDLE"),
            Self::Unknown => None,
        }
    }

    /// Resolve an advertised model token (case-insensitive).
    pub fn from_model_token(token: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|t| {
                t.model_token()
                    .map(|m| m.eq_ignore_ascii_case(token))
                    .unwrap_or(false)
            })
            .unwrap_or(Self::Unknown)
    }

    /// Measurement kinds a probe of this type reports.
    pub fn supported_kinds(&self) -> &'static [MeasurementKind] {
        match self {
            Self::T104IrBt => &[
                MeasurementKind::SurfaceTemperature,
                MeasurementKind::PlungeTemperature,
            ],
            Self::MfHandle | Self::QsrHandle => &[MeasurementKind::Temperature],
            Self::Unknown => &[],
        }
    }

    /// Check whether this probe type reports the given kind.
    pub fn supports(&self, kind: MeasurementKind) -> bool {
        self.supported_kinds().contains(&kind)
    }
}

impl std::fmt::Display for ProbeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Identity and type of a discovered probe.
///
/// The serial number is unique per physical probe and is the key every
/// other component uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    serial_number: String,
    probe_type: ProbeType,
}

impl DeviceDescriptor {
    /// Create a new descriptor.
    pub fn new(serial_number: impl Into<String>, probe_type: ProbeType) -> Self {
        Self {
            serial_number: serial_number.into(),
            probe_type,
        }
    }

    /// Parse an advertised local name of the form `"<MODEL> <SERIAL>"`.
    ///
    /// Returns `None` for names that do not belong to a probe.
    ///
    /// # Example
    ///
    /// ```
    /// use probe_link_ble::{DeviceDescriptor, ProbeType};
    ///
    /// let d = DeviceDescriptor::from_advertised_name("MF-HANDLE 41234567").unwrap();
    /// assert_eq!(d.serial_number(), "41234567");
    /// assert_eq!(d.probe_type(), ProbeType::MfHandle);
    /// ```
    pub fn from_advertised_name(name: &str) -> Option<Self> {
        let mut parts = name.split_whitespace();
        let model = parts.next()?;
        let serial = parts.next()?;

        if parts.next().is_some() || !serial.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        match ProbeType::from_model_token(model) {
            ProbeType::Unknown => None,
            probe_type => Some(Self::new(serial, probe_type)),
        }
    }

    /// Get the serial number.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Get the probe type.
    pub fn probe_type(&self) -> ProbeType {
        self.probe_type
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.serial_number, self.probe_type)
    }
}
