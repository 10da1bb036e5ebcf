//! The SQLite record format: how a row's column values are packed into a
//! cell payload.
//!
//! A record is a header followed by a body. The header starts with its own
//! total size as a varint, then one serial-type varint per column; the body
//! holds the column values back to back. Serial types encode both the
//! storage class and the byte length:
//!
//! | serial type  | bytes    | meaning                       |
//! |--------------|----------|-------------------------------|
//! | 0            | 0        | NULL                          |
//! | 1..=6        | 1,2,3,4,6,8 | big-endian signed integer  |
//! | 7            | 8        | IEEE 754 double               |
//! | 8, 9         | 0        | integer constants 0 and 1     |
//! | 10, 11       | —        | reserved, never valid         |
//! | even >= 12   | (N-12)/2 | BLOB                          |
//! | odd >= 13    | (N-13)/2 | TEXT                          |

use crate::value::Value;
use crate::varint::{read_varint, varint_len, write_varint};

/// Number of body bytes a serial type occupies.
///
/// Returns `None` for the reserved types 10 and 11.
pub const fn serial_type_len(serial_type: u64) -> Option<u64> {
    match serial_type {
        0 | 8 | 9 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(6),
        6 | 7 => Some(8),
        10 | 11 => None,
        n if n % 2 == 0 => Some((n - 12) / 2),
        n => Some((n - 13) / 2),
    }
}

/// The smallest serial type that can hold `value`.
#[allow(clippy::cast_sign_loss)]
pub const fn serial_type_for_integer(value: i64) -> u64 {
    if value == 0 {
        return 8;
    }
    if value == 1 {
        return 9;
    }
    let magnitude = if value < 0 {
        !(value as u64)
    } else {
        value as u64
    };
    if magnitude <= 0x7F {
        1
    } else if magnitude <= 0x7FFF {
        2
    } else if magnitude <= 0x7F_FFFF {
        3
    } else if magnitude <= 0x7FFF_FFFF {
        4
    } else if magnitude <= 0x7FFF_FFFF_FFFF {
        5
    } else {
        6
    }
}

/// Serial type for a text value of `len` bytes.
pub const fn serial_type_for_text(len: u64) -> u64 {
    len * 2 + 13
}

/// Serial type for a blob value of `len` bytes.
pub const fn serial_type_for_blob(len: u64) -> u64 {
    len * 2 + 12
}

/// Parse a complete record (header + body) into its column values.
///
/// Returns `None` if the record is malformed in any way: truncated header or
/// body, reserved serial types, non-UTF-8 text. An empty input is malformed
/// too, since every real record begins with a header-size varint. Trailing
/// bytes past the body are ignored.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_record(data: &[u8]) -> Option<Vec<Value>> {
    let (header_size_u64, size_len) = read_varint(data)?;
    let header_size = header_size_u64 as usize;
    if header_size < size_len || header_size > data.len() {
        return None;
    }

    let mut serial_types = Vec::new();
    let mut offset = size_len;
    while offset < header_size {
        let (serial_type, consumed) = read_varint(&data[offset..header_size])?;
        serial_types.push(serial_type);
        offset += consumed;
    }

    let mut values = Vec::with_capacity(serial_types.len());
    let mut body_offset = header_size;
    for &st in &serial_types {
        let len = serial_type_len(st)? as usize;
        let bytes = data.get(body_offset..body_offset + len)?;
        values.push(decode_value(st, bytes)?);
        body_offset += len;
    }
    Some(values)
}

/// Serialize column values into record bytes (header + body).
pub fn serialize_record(values: &[Value]) -> Vec<u8> {
    let serial_types: Vec<u64> = values.iter().map(serial_type_for_value).collect();

    let types_len: usize = serial_types.iter().map(|&st| varint_len(st)).sum();
    let header_size = header_size_for(types_len);

    #[allow(clippy::cast_possible_truncation)]
    let body_len: usize = serial_types
        .iter()
        .map(|&st| serial_type_len(st).unwrap_or(0) as usize)
        .sum();

    let mut buf = vec![0u8; header_size + body_len];
    let mut offset = write_varint(&mut buf, header_size as u64);
    for &st in &serial_types {
        offset += write_varint(&mut buf[offset..], st);
    }
    debug_assert_eq!(offset, header_size);

    for (value, &st) in values.iter().zip(&serial_types) {
        #[allow(clippy::cast_possible_truncation)]
        let len = serial_type_len(st).unwrap_or(0) as usize;
        encode_value(value, st, &mut buf[offset..offset + len]);
        offset += len;
    }
    buf
}

/// Total header size including the header-size varint itself.
///
/// The size field counts its own bytes, so growing the field can in turn
/// grow the size; iterate until it settles.
#[allow(clippy::cast_possible_truncation)]
fn header_size_for(types_len: usize) -> usize {
    let mut header_size = types_len + 1;
    loop {
        let needed = varint_len(header_size as u64) + types_len;
        if needed <= header_size {
            return header_size;
        }
        header_size = needed;
    }
}

fn serial_type_for_value(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Integer(i) => serial_type_for_integer(*i),
        // NaN is stored as NULL, matching SQLite.
        Value::Float(f) => {
            if f.is_nan() {
                0
            } else {
                7
            }
        }
        Value::Text(s) => serial_type_for_text(s.len() as u64),
        Value::Blob(b) => serial_type_for_blob(b.len() as u64),
    }
}

fn decode_value(serial_type: u64, bytes: &[u8]) -> Option<Value> {
    match serial_type {
        0 => Some(Value::Null),
        1..=6 => Some(Value::Integer(decode_big_endian_signed(bytes))),
        7 => {
            let bits = u64::from_be_bytes(bytes.try_into().ok()?);
            let value = f64::from_bits(bits);
            if value.is_nan() {
                Some(Value::Null)
            } else {
                Some(Value::Float(value))
            }
        }
        8 => Some(Value::Integer(0)),
        9 => Some(Value::Integer(1)),
        10 | 11 => None,
        n if n % 2 == 0 => Some(Value::Blob(bytes.to_vec())),
        _ => {
            let s = std::str::from_utf8(bytes).ok()?;
            Some(Value::Text(s.to_owned()))
        }
    }
}

/// Decode a big-endian signed integer of 1-8 bytes with sign extension.
#[allow(clippy::cast_possible_wrap)]
fn decode_big_endian_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value: u64 = if bytes[0] & 0x80 != 0 { u64::MAX } else { 0 };
    for &b in bytes {
        value = (value << 8) | u64::from(b);
    }
    value as i64
}

fn encode_value(value: &Value, serial_type: u64, buf: &mut [u8]) {
    match value {
        Value::Null => {}
        Value::Integer(i) => {
            // Serial types 8 and 9 carry no bytes.
            if (1..=6).contains(&serial_type) {
                let bytes = i.to_be_bytes();
                buf.copy_from_slice(&bytes[8 - buf.len()..]);
            }
        }
        Value::Float(f) => {
            if !f.is_nan() {
                buf.copy_from_slice(&f.to_bits().to_be_bytes());
            }
        }
        Value::Text(s) => buf.copy_from_slice(s.as_bytes()),
        Value::Blob(b) => buf.copy_from_slice(b),
    }
}
