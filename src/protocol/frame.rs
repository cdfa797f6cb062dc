//! Raw notification frame parsing and construction.
//!
//! Frame layout (all multi-byte fields little-endian):
//!
//! - Measurement (9 bytes): `[0x01][kind][precision][value f32][crc16]`
//! - Keep-alive (3 bytes): `[0x02][crc16]`
//!
//! The CRC covers every byte before it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::data::{MeasurementKind, MeasurementSample, PhysicalUnit};
use crate::protocol::crc::{append_crc, verify_crc};

/// Frame type byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Carries one measurement value.
    Measurement = 0x01,
    /// Periodic link keep-alive with no payload.
    KeepAlive = 0x02,
}

impl FrameType {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Measurement),
            0x02 => Some(Self::KeepAlive),
            _ => None,
        }
    }
}

/// A parsed raw notification frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawFrame {
    /// A measurement frame.
    Measurement {
        /// Raw kind code (may be unknown to this crate).
        kind: u8,
        /// Decimals the probe resolves.
        precision: u8,
        /// Value as reported.
        value: f32,
    },
    /// A keep-alive frame.
    KeepAlive,
}

impl RawFrame {
    /// Size of a measurement frame including CRC.
    pub const MEASUREMENT_LEN: usize = 9;
    /// Size of a keep-alive frame including CRC.
    pub const KEEP_ALIVE_LEN: usize = 3;

    /// Parse a frame. Returns `None` for anything malformed: wrong length,
    /// unknown frame type or CRC mismatch.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let frame_type = FrameType::from_raw(*data.first()?)?;

        let expected_len = match frame_type {
            FrameType::Measurement => Self::MEASUREMENT_LEN,
            FrameType::KeepAlive => Self::KEEP_ALIVE_LEN,
        };
        if data.len() != expected_len || !verify_crc(data) {
            return None;
        }

        match frame_type {
            FrameType::Measurement => Some(Self::Measurement {
                kind: data[1],
                precision: data[2],
                value: f32::from_le_bytes([data[3], data[4], data[5], data[6]]),
            }),
            FrameType::KeepAlive => Some(Self::KeepAlive),
        }
    }

    /// Serialize the frame, CRC included.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MEASUREMENT_LEN);

        match *self {
            Self::Measurement {
                kind,
                precision,
                value,
            } => {
                buf.put_u8(FrameType::Measurement as u8);
                buf.put_u8(kind);
                buf.put_u8(precision);
                buf.put_f32_le(value);
            }
            Self::KeepAlive => buf.put_u8(FrameType::KeepAlive as u8),
        }

        append_crc(&mut buf);
        buf.freeze()
    }
}

/// Build the raw frame a probe sends for `sample`.
pub fn encode_measurement(sample: &MeasurementSample) -> Bytes {
    RawFrame::Measurement {
        kind: sample.kind.to_raw(),
        precision: sample.unit.precision,
        value: sample.raw_value,
    }
    .to_bytes()
}

/// Build a keep-alive frame.
pub fn encode_keep_alive() -> Bytes {
    RawFrame::KeepAlive.to_bytes()
}

/// Convenience for building a measurement frame from parts.
pub fn measurement_frame(kind: MeasurementKind, raw_value: f32, precision: u8) -> Bytes {
    encode_measurement(&MeasurementSample::new(
        kind,
        raw_value,
        PhysicalUnit::new(precision),
    ))
}
