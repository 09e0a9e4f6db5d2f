//! Bounded variable-length integers
//!
//! Unsigned values in [0, 2^28) are stored in one to four bytes of seven
//! payload bits each, least-significant group first, with the high bit of
//! every byte but the last set as a continuation marker. The bound makes
//! four bytes the hard ceiling, so a corrupt stream cannot run away.

use crate::codec::CodecError;

/// Exclusive upper bound on encodable values
pub const VARINT_LIMIT: u32 = 1 << 28;

/// Append the varint encoding of `value` to `out`
pub fn encode_varint(out: &mut Vec<u8>, value: u32) -> Result<(), CodecError> {
    if value >= VARINT_LIMIT {
        return Err(CodecError::ValueOutOfRange(value));
    }
    let mut rest = value;
    loop {
        let group = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            out.push(group);
            return Ok(());
        }
        out.push(group | 0x80);
    }
}

/// Decode one varint from the front of `bytes`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u32, usize), CodecError> {
    let mut value: u32 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(4) {
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if bytes.len() < 4 {
        Err(CodecError::Truncated)
    } else {
        // Four bytes with the continuation bit still set on the last
        Err(CodecError::ValueOutOfRange(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u32) -> usize {
        let mut buffer = Vec::new();
        encode_varint(&mut buffer, value).unwrap();
        let (decoded, consumed) = decode_varint(&buffer).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, buffer.len());
        buffer.len()
    }

    #[test]
    fn test_length_boundaries() {
        assert_eq!(roundtrip(0), 1);
        assert_eq!(roundtrip(127), 1);
        assert_eq!(roundtrip(128), 2);
        assert_eq!(roundtrip(16_383), 2);
        assert_eq!(roundtrip(16_384), 3);
        assert_eq!(roundtrip(2_097_151), 3);
        assert_eq!(roundtrip(2_097_152), 4);
        assert_eq!(roundtrip(VARINT_LIMIT - 1), 4);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut buffer = Vec::new();
        assert!(matches!(
            encode_varint(&mut buffer, VARINT_LIMIT),
            Err(CodecError::ValueOutOfRange(_))
        ));
        assert!(buffer.is_empty(), "nothing may be written on failure");
    }

    #[test]
    fn test_truncated_stream() {
        assert!(matches!(
            decode_varint(&[0x80]),
            Err(CodecError::Truncated)
        ));
        assert!(matches!(decode_varint(&[]), Err(CodecError::Truncated)));
    }

    #[test]
    fn test_overlong_stream_rejected() {
        // Four continuation-marked bytes never form a valid value.
        assert!(matches!(
            decode_varint(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(CodecError::ValueOutOfRange(_))
        ));
    }
}
