//! SQLite's variable-length integer encoding.
//!
//! A varint is 1 to 9 bytes. In the first 8 bytes the high bit marks
//! continuation and the low 7 bits carry data; a 9th byte, when present,
//! contributes all 8 of its bits. This is not LEB128: `u64::MAX` takes 9
//! bytes here, not 10, and the byte sequences differ.

/// Read a varint, returning `(value, bytes_consumed)`.
///
/// Returns `None` when the buffer ends before the varint does.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(8) {
        if byte & 0x80 == 0 {
            value = (value << 7) | u64::from(byte);
            return Some((value, i + 1));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
    }
    if buf.len() > 8 {
        // 9th byte carries a full 8 bits.
        value = (value << 8) | u64::from(buf[8]);
        Some((value, 9))
    } else {
        None
    }
}

/// Number of bytes `value` takes as a varint.
pub const fn varint_len(value: u64) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else if value <= 0x001F_FFFF {
        3
    } else if value <= 0x0FFF_FFFF {
        4
    } else if value <= 0x07_FFFF_FFFF {
        5
    } else if value <= 0x03FF_FFFF_FFFF {
        6
    } else if value <= 0x01_FFFF_FFFF_FFFF {
        7
    } else if value <= 0xFF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

/// Write a varint into `buf`, returning the number of bytes written.
///
/// `buf` must have at least `varint_len(value)` bytes available.
#[allow(clippy::cast_possible_truncation)]
pub fn write_varint(buf: &mut [u8], value: u64) -> usize {
    let len = varint_len(value);
    if len == 9 {
        let mut v = value >> 8;
        for i in (0..8).rev() {
            buf[i] = (v as u8 & 0x7F) | 0x80;
            v >>= 7;
        }
        buf[8] = value as u8;
    } else {
        let mut v = value;
        for i in (0..len).rev() {
            buf[i] = v as u8 & 0x7F;
            if i != len - 1 {
                buf[i] |= 0x80;
            }
            v >>= 7;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_encodings() {
        // Byte sequences as produced by C SQLite's sqlite3PutVarint.
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x81, 0x00]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x81, 0x80, 0x00]),
            (
                u64::MAX,
                &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
            ),
        ];
        let mut buf = [0u8; 9];
        for &(value, expected) in cases {
            let written = write_varint(&mut buf, value);
            assert_eq!(&buf[..written], expected, "encoding mismatch for {value}");
            let (decoded, consumed) = read_varint(expected).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, expected.len());
        }
    }

    #[test]
    fn length_boundaries() {
        let boundaries: &[(u64, usize)] = &[
            (0x7F, 1),
            (0x80, 2),
            (0x3FFF, 2),
            (0x4000, 3),
            (0x001F_FFFF, 3),
            (0x0020_0000, 4),
            (0x0FFF_FFFF, 4),
            (0x1000_0000, 5),
            (0x07_FFFF_FFFF, 5),
            (0x08_0000_0000, 6),
            (0x03FF_FFFF_FFFF, 6),
            (0x0400_0000_0000, 7),
            (0x01_FFFF_FFFF_FFFF, 7),
            (0x02_0000_0000_0000, 8),
            (0xFF_FFFF_FFFF_FFFF, 8),
            (0x0100_0000_0000_0000, 9),
            (u64::MAX, 9),
        ];
        let mut buf = [0u8; 9];
        for &(value, expected_len) in boundaries {
            assert_eq!(varint_len(value), expected_len, "varint_len({value:#x})");
            let written = write_varint(&mut buf, value);
            assert_eq!(written, expected_len);
            let (decoded, consumed) = read_varint(&buf[..written]).unwrap();
            assert_eq!(decoded, value, "roundtrip for {value:#x}");
            assert_eq!(consumed, written);
        }
    }

    #[test]
    fn ninth_byte_keeps_all_eight_bits() {
        // If the 9th byte were treated as 7-bit, a low byte with the high
        // bit set would not survive.
        let value = (1u64 << 56) | 0xFF;
        let mut buf = [0u8; 9];
        assert_eq!(write_varint(&mut buf, value), 9);
        assert_eq!(buf[8], 0xFF);
        assert!(buf[..8].iter().all(|b| b & 0x80 != 0));
        assert_eq!(read_varint(&buf), Some((value, 9)));
    }

    #[test]
    fn negative_rowids_survive_the_u64_cast() {
        // Rowids are i64 stored as u64 varints via two's complement.
        let mut buf = [0u8; 9];
        for rowid in [-1i64, i64::MIN, -42] {
            let raw = rowid as u64;
            let written = write_varint(&mut buf, raw);
            assert_eq!(written, 9, "negative rowids always take 9 bytes");
            let (decoded, _) = read_varint(&buf[..written]).unwrap();
            assert_eq!(decoded as i64, rowid);
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(read_varint(&[]).is_none());
        assert!(read_varint(&[0x81]).is_none());

        let mut buf = [0u8; 9];
        let written = write_varint(&mut buf, u64::MAX);
        assert_eq!(written, 9);
        assert!(read_varint(&buf[..8]).is_none());
    }

    #[test]
    fn decoder_stops_at_varint_end() {
        let mut buf = [0xCCu8; 16];
        let written = write_varint(&mut buf, 300);
        assert_eq!(written, 2);
        let (decoded, consumed) = read_varint(&buf).unwrap();
        assert_eq!(decoded, 300);
        assert_eq!(consumed, 2);
    }
}
