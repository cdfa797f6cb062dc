//! Protocol module for raw notification frames.
//!
//! This module contains the implementations for:
//! - Raw frame parsing and construction
//! - Measurement decoding per probe type
//! - CRC calculation

pub mod crc;
pub mod decoder;
pub mod frame;

pub use crc::calculate_crc;
pub use decoder::decode;
pub use frame::{encode_keep_alive, encode_measurement, measurement_frame, FrameType, RawFrame};
