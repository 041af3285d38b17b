//! # Row Serialization for Spill Pages
//!
//! Rows written to run files, partition files and materialized join inputs are
//! encoded with a compact tagged format. The encoding is only ever read back
//! by the process that wrote it, so it carries no version field and makes no
//! ordering guarantees.
//!
//! ## Encoding Format
//!
//! ```text
//! Row := [col_count: u16] [Column]*
//! Column := [discriminant: u8] [Data]
//!
//! Discriminants:
//!   0x01 = NULL (no data)
//!   0x12 = INT (8 bytes big-endian i64)
//!   0x14 = ZERO (no data, deserializes to Int(0))
//!   0x15 = FLOAT (8 bytes f64 bits, big-endian)
//!   0x20 = TEXT ([len: u32] [utf8_bytes])
//!   0x21 = BLOB ([len: u32] [bytes])
//!   0x33 = TIMESTAMPTZ (8 + 4 bytes: micros + offset_secs)
//!   0x40 = UUID (16 bytes)
//!   0x83 = DECIMAL (16 + 2 bytes: digits as i128 + scale)
//! ```
//!
//! Floats are always written with their full bit pattern so that `-0.0`,
//! NaN payloads and infinities survive a spill unchanged.
//!
//! ## Buffer Reuse
//!
//! - `serialize_row_into`: appends to a caller-owned `Vec<u8>`
//! - `deserialize_row_into`: fills a caller-owned `Row`
//! - `row_size`: exact encoded size, for pre-sizing page buffers

use crate::executor::Row;
use crate::types::Value;
use eyre::{bail, ensure, Result};
use std::borrow::Cow;

mod discriminant {
    pub const NULL: u8 = 0x01;

    pub const INT: u8 = 0x12;
    pub const ZERO: u8 = 0x14;
    pub const FLOAT: u8 = 0x15;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;

    pub const TIMESTAMPTZ: u8 = 0x33;

    pub const UUID: u8 = 0x40;

    pub const DECIMAL: u8 = 0x83;
}

pub struct RowSerde;

impl RowSerde {
    pub fn serialize_row_into(row: &[Value<'_>], buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(row.len() as u16).to_be_bytes());

        for value in row {
            Self::serialize_value_into(value, buf);
        }
    }

    fn serialize_value_into(value: &Value<'_>, buf: &mut Vec<u8>) {
        match value {
            Value::Null => buf.push(discriminant::NULL),
            Value::Int(0) => buf.push(discriminant::ZERO),
            Value::Int(i) => {
                buf.push(discriminant::INT);
                buf.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(f) => {
                buf.push(discriminant::FLOAT);
                buf.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Text(s) => {
                buf.push(discriminant::TEXT);
                let bytes = s.as_bytes();
                buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
            Value::Blob(b) => {
                buf.push(discriminant::BLOB);
                buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
                buf.extend_from_slice(b);
            }
            Value::Uuid(u) => {
                buf.push(discriminant::UUID);
                buf.extend_from_slice(u);
            }
            Value::TimestampTz {
                micros,
                offset_secs,
            } => {
                buf.push(discriminant::TIMESTAMPTZ);
                buf.extend_from_slice(&micros.to_be_bytes());
                buf.extend_from_slice(&offset_secs.to_be_bytes());
            }
            Value::Decimal { digits, scale } => {
                buf.push(discriminant::DECIMAL);
                buf.extend_from_slice(&digits.to_be_bytes());
                buf.extend_from_slice(&scale.to_be_bytes());
            }
        }
    }

    pub fn deserialize_row_into(data: &[u8], offset: &mut usize, out: &mut Row) -> Result<()> {
        let col_count = u16::from_be_bytes(take::<2>(data, offset, "column count")?) as usize;

        out.clear();
        out.reserve(col_count);

        for _ in 0..col_count {
            let value = Self::deserialize_value(data, offset)?;
            out.push(value);
        }

        Ok(())
    }

    pub fn deserialize_row(data: &[u8], offset: &mut usize) -> Result<Row> {
        let mut row = Row::new();
        Self::deserialize_row_into(data, offset, &mut row)?;
        Ok(row)
    }

    fn deserialize_value(data: &[u8], offset: &mut usize) -> Result<Value<'static>> {
        let [disc] = take::<1>(data, offset, "discriminant")?;

        match disc {
            discriminant::NULL => Ok(Value::Null),
            discriminant::ZERO => Ok(Value::Int(0)),
            discriminant::INT => Ok(Value::Int(i64::from_be_bytes(take(data, offset, "int")?))),
            discriminant::FLOAT => Ok(Value::Float(f64::from_bits(u64::from_be_bytes(take(
                data, offset, "float",
            )?)))),
            discriminant::TEXT => {
                let bytes = take_var(data, offset, "text")?;
                match std::str::from_utf8(bytes) {
                    Ok(s) => Ok(Value::Text(Cow::Owned(s.to_string()))),
                    Err(e) => bail!("invalid utf-8 in spilled text: {}", e),
                }
            }
            discriminant::BLOB => {
                let bytes = take_var(data, offset, "blob")?;
                Ok(Value::Blob(Cow::Owned(bytes.to_vec())))
            }
            discriminant::UUID => Ok(Value::Uuid(take(data, offset, "uuid")?)),
            discriminant::TIMESTAMPTZ => {
                let micros = i64::from_be_bytes(take(data, offset, "timestamptz")?);
                let offset_secs = i32::from_be_bytes(take(data, offset, "timestamptz offset")?);
                Ok(Value::TimestampTz {
                    micros,
                    offset_secs,
                })
            }
            discriminant::DECIMAL => {
                let digits = i128::from_be_bytes(take(data, offset, "decimal")?);
                let scale = i16::from_be_bytes(take(data, offset, "decimal scale")?);
                Ok(Value::Decimal { digits, scale })
            }
            other => bail!("unknown value discriminant 0x{:02x}", other),
        }
    }

    /// Exact encoded size of `row`.
    pub fn row_size(row: &[Value<'_>]) -> usize {
        2 + row.iter().map(Self::value_size).sum::<usize>()
    }

    fn value_size(value: &Value<'_>) -> usize {
        1 + match value {
            Value::Null | Value::Int(0) => 0,
            Value::Int(_) | Value::Float(_) => 8,
            Value::Text(s) => 4 + s.len(),
            Value::Blob(b) => 4 + b.len(),
            Value::Uuid(_) => 16,
            Value::TimestampTz { .. } => 12,
            Value::Decimal { .. } => 18,
        }
    }
}

fn take<const N: usize>(data: &[u8], offset: &mut usize, what: &str) -> Result<[u8; N]> {
    ensure!(
        data.len() >= *offset + N,
        "truncated row: missing {} bytes of {}",
        N,
        what
    );
    let mut out = [0u8; N];
    out.copy_from_slice(&data[*offset..*offset + N]);
    *offset += N;
    Ok(out)
}

fn take_var<'d>(data: &'d [u8], offset: &mut usize, what: &str) -> Result<&'d [u8]> {
    let len = u32::from_be_bytes(take(data, offset, what)?) as usize;
    ensure!(
        data.len() >= *offset + len,
        "truncated row: {} declares {} bytes, {} remain",
        what,
        len,
        data.len() - *offset
    );
    let bytes = &data[*offset..*offset + len];
    *offset += len;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn mixed_row_survives_encoding() {
        let row: Row = smallvec![
            Value::Null,
            Value::Int(0),
            Value::Int(-17),
            Value::Float(-0.0),
            Value::Text(Cow::Borrowed("héllo")),
            Value::Blob(Cow::Borrowed(&[1u8, 2, 3][..])),
            Value::Uuid([7; 16]),
            Value::TimestampTz {
                micros: 1_700_000_000_000_000,
                offset_secs: -3600,
            },
            Value::Decimal {
                digits: -12345,
                scale: 2,
            },
        ];

        let mut buf = Vec::new();
        RowSerde::serialize_row_into(&row, &mut buf);
        assert_eq!(buf.len(), RowSerde::row_size(&row));

        let mut offset = 0;
        let decoded = RowSerde::deserialize_row(&buf, &mut offset).unwrap();
        assert_eq!(offset, buf.len());
        assert_eq!(decoded.len(), row.len());
        assert_eq!(decoded[2], Value::Int(-17));
        match decoded[3] {
            Value::Float(f) => assert!(f == 0.0 && f.is_sign_negative()),
            ref other => panic!("expected float, got {:?}", other),
        }
        assert_eq!(decoded[4], Value::Text(Cow::Borrowed("héllo")));
        assert_eq!(decoded[8], row[8]);
    }

    #[test]
    fn truncated_text_is_rejected() {
        let row: Row = smallvec![Value::Text(Cow::Borrowed("abcdef"))];
        let mut buf = Vec::new();
        RowSerde::serialize_row_into(&row, &mut buf);
        buf.truncate(buf.len() - 2);

        let mut offset = 0;
        let err = RowSerde::deserialize_row(&buf, &mut offset).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let buf = [0u8, 1, 0xEE];
        let mut offset = 0;
        assert!(RowSerde::deserialize_row(&buf, &mut offset).is_err());
    }
}
