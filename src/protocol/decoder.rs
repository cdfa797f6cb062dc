//! Measurement decoding.
//!
//! Turns raw notification frames into [`MeasurementSample`]s. Decoding is
//! pure and total: anything that is not a valid measurement for the probe
//! type yields `None`.

use tracing::trace;

use crate::data::{MeasurementKind, MeasurementSample, PhysicalUnit, ProbeType};
use crate::protocol::frame::RawFrame;

/// Decode one raw event from a probe of the given type.
///
/// Returns `None` for keep-alives, malformed frames, unknown kinds, kinds
/// the probe type does not report and non-finite values. Values are passed
/// through unchanged (Kelvin for temperatures).
///
/// # Example
///
/// ```
/// use probe_link_ble::data::{MeasurementKind, ProbeType};
/// use probe_link_ble::protocol::{decode, measurement_frame};
///
/// let raw = measurement_frame(MeasurementKind::Temperature, 300.0, 1);
/// let sample = decode(ProbeType::MfHandle, &raw).unwrap();
/// assert_eq!(sample.raw_value, 300.0);
///
/// // An IR probe never reports plain TEMPERATURE.
/// assert!(decode(ProbeType::T104IrBt, &raw).is_none());
/// ```
pub fn decode(probe_type: ProbeType, raw: &[u8]) -> Option<MeasurementSample> {
    let (kind, precision, value) = match RawFrame::parse(raw) {
        Some(RawFrame::Measurement {
            kind,
            precision,
            value,
        }) => (kind, precision, value),
        Some(RawFrame::KeepAlive) => {
            trace!("keep-alive from {}", probe_type);
            return None;
        }
        None => {
            trace!("dropping malformed frame from {}: {:02X?}", probe_type, raw);
            return None;
        }
    };

    let kind = MeasurementKind::from_raw(kind)?;

    if !probe_type.supports(kind) || !value.is_finite() {
        trace!("dropping {} sample {} for {}", kind, value, probe_type);
        return None;
    }

    Some(MeasurementSample::new(kind, value, PhysicalUnit::new(precision)))
}
