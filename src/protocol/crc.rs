//! CRC calculation for raw notification frames.
//!
//! Uses the CRC-16/CCITT-FALSE polynomial (0x1021).

/// CRC-16/CCITT-FALSE polynomial
const CRC_POLYNOMIAL: u16 = 0x1021;

/// Initial CRC value
const CRC_INITIAL: u16 = 0xFFFF;

/// Calculate CRC-16 for frame data.
///
/// # Example
///
/// ```
/// use probe_link_ble::protocol::calculate_crc;
///
/// // CRC-16/CCITT-FALSE check value
/// assert_eq!(calculate_crc(b"123456789"), 0x29B1);
/// ```
pub fn calculate_crc(data: &[u8]) -> u16 {
    let mut crc = CRC_INITIAL;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Verify a frame whose last two bytes are its CRC (little-endian).
pub fn verify_crc(data: &[u8]) -> bool {
    if data.len() < 3 {
        return false;
    }

    let payload_len = data.len() - 2;
    let expected_crc = calculate_crc(&data[..payload_len]);
    let actual_crc = u16::from_le_bytes([data[payload_len], data[payload_len + 1]]);

    expected_crc == actual_crc
}

/// Append the CRC of `buf` to `buf` in little-endian order.
pub fn append_crc(buf: &mut bytes::BytesMut) {
    let crc = calculate_crc(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}
