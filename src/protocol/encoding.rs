//! Shared value encodings used across command classes.
//!
//! Meters and multi-level sensors report readings as a signed big-endian
//! integer plus a decimal precision; multi-level switches and basic V2 use
//! a one-byte duration encoding that distinguishes seconds from minutes.

use std::io::Cursor;
use std::time::Duration;

use bytes::Buf;

use crate::error::{Error, Result};

/// Decodes a 1, 2 or 4-byte two's-complement big-endian integer into a
/// float, shifting the decimal point `precision` places to the left.
///
/// Any other byte length is an error.
pub fn decode_float(data: &[u8], precision: u8) -> Result<f32> {
    let mut cursor = Cursor::new(data);
    let magnitude = match data.len() {
        1 => f32::from(cursor.get_i8()),
        2 => f32::from(cursor.get_i16()),
        4 => cursor.get_i32() as f32,
        n => {
            return Err(Error::protocol(format!(
                "bad float value length: {n} not in {{1, 2, 4}}"
            )))
        }
    };

    Ok(magnitude / 10f32.powi(i32::from(precision)))
}

/// Encodes a duration into the one-byte wire form.
///
/// Durations up to 127 whole seconds encode as the second count; whole
/// minutes up to 127 encode as `0x80 + (minutes - 1)`. Everything else is
/// unrepresentable and refused.
pub fn encode_duration(duration: Duration) -> Result<u8> {
    if duration.subsec_nanos() != 0 {
        return Err(Error::protocol(format!(
            "duration not a whole second count: {duration:?}"
        )));
    }

    let seconds = duration.as_secs();
    if seconds <= 127 {
        return Ok(seconds as u8);
    }

    if seconds % 60 == 0 {
        let minutes = seconds / 60;
        if (1..=127).contains(&minutes) {
            return Ok(0x80 + (minutes as u8 - 1));
        }
    }

    Err(Error::protocol(format!(
        "duration not encodable: {duration:?}"
    )))
}

/// Decodes the one-byte duration form. Inverse of [`encode_duration`].
#[must_use]
pub fn decode_duration(byte: u8) -> Duration {
    if byte < 0x80 {
        Duration::from_secs(u64::from(byte))
    } else {
        Duration::from_secs(60 * (u64::from(byte - 0x80) + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_float_matrix() {
        let cases: &[(&[u8], u8, f32)] = &[
            (&[0], 0, 0.0),
            (&[0], 1, 0.0),
            (&[0], 2, 0.0),
            (&[23], 0, 23.0),
            (&[23], 1, 2.3),
            (&[23], 2, 0.23),
            (&[23], 3, 0.023),
            (&[252], 0, -4.0),
            (&[252], 2, -0.04),
            (&[0x7F, 0xFF], 0, 32767.0),
            (&[0x7F, 0xFF], 3, 32.767),
            (&[0xFF, 0xFF], 0, -1.0),
            (&[0xFF, 0xFF], 1, -0.1),
            (&[0xFF, 23], 0, -233.0),
            (&[0xFF, 23], 2, -2.33),
            (&[0x7F, 0xFF, 0xFF, 0xCB], 0, 2_147_483_647.0),
            (&[0xFF, 0xFF, 0xFF, 0xCB], 0, -53.0),
        ];

        for (bytes, precision, expected) in cases {
            let value = decode_float(bytes, *precision).unwrap();
            assert_eq!(
                value, *expected,
                "decode_float({bytes:02x?}, {precision}) = {value}"
            );
        }
    }

    #[test]
    fn test_decode_float_bad_lengths() {
        assert!(decode_float(&[], 0).is_err());
        assert!(decode_float(&[0xFF, 0xFF, 0xFF], 0).is_err());
        assert!(decode_float(&[0; 5], 0).is_err());
    }

    #[test]
    fn test_duration_seconds_law() {
        for s in 0..=127u8 {
            let duration = Duration::from_secs(u64::from(s));
            let byte = encode_duration(duration).unwrap();
            assert_eq!(byte, s);
            assert_eq!(decode_duration(byte), duration);
        }
    }

    #[test]
    fn test_duration_minutes_law() {
        for m in 1..=127u64 {
            let duration = Duration::from_secs(60 * m);
            let byte = encode_duration(duration).unwrap();
            assert_eq!(decode_duration(byte), duration);
            if m > 2 {
                // 1 and 2 minutes fit the seconds byte; the rest take the
                // minute form.
                assert_eq!(byte, 0x80 + (m as u8 - 1));
            }
        }
    }

    #[test]
    fn test_duration_unencodable() {
        assert!(encode_duration(Duration::from_secs(128)).is_err());
        assert!(encode_duration(Duration::from_secs(61)).is_err());
        assert!(encode_duration(Duration::from_millis(1500)).is_err());
        assert!(encode_duration(Duration::from_secs(60 * 128)).is_err());
    }

    #[test]
    fn test_decode_duration_minute_range() {
        assert_eq!(decode_duration(0x80), Duration::from_secs(60));
        assert_eq!(decode_duration(0xFE), Duration::from_secs(60 * 127));
        assert_eq!(decode_duration(0xFF), Duration::from_secs(60 * 128));
    }
}
