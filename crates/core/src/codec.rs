//! Binary row encoding used by sort spill-run files.
//!
//! Layout per cell: one tag byte, then a little-endian payload. Strings and
//! binary cells carry a u32 length prefix; integers and date-millis are i64;
//! numbers are f64 bit patterns; booleans are one byte. The reader must know the
//! row arity (spill files carry it via their schema binding).

use std::io::{Read, Write};

use chrono::DateTime;

use rowflow_common::{Result, RowflowError};

use crate::row::Row;
use crate::value::Value;

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_BOOLEAN: u8 = 4;
const TAG_DATE: u8 = 5;
const TAG_BINARY: u8 = 6;

/// Encode one row.
pub fn write_row(w: &mut impl Write, row: &Row) -> Result<()> {
    for value in row.values() {
        match value {
            Value::Null => w.write_all(&[TAG_NULL])?,
            Value::String(s) => {
                w.write_all(&[TAG_STRING])?;
                write_bytes(w, s.as_bytes())?;
            }
            Value::Integer(i) => {
                w.write_all(&[TAG_INTEGER])?;
                w.write_all(&i.to_le_bytes())?;
            }
            Value::Number(n) => {
                w.write_all(&[TAG_NUMBER])?;
                w.write_all(&n.to_bits().to_le_bytes())?;
            }
            Value::Boolean(b) => w.write_all(&[TAG_BOOLEAN, u8::from(*b)])?,
            Value::Date(d) => {
                w.write_all(&[TAG_DATE])?;
                w.write_all(&d.and_utc().timestamp_millis().to_le_bytes())?;
            }
            Value::Binary(bytes) => {
                w.write_all(&[TAG_BINARY])?;
                write_bytes(w, bytes)?;
            }
        }
    }
    Ok(())
}

/// Decode one row of `arity` cells.
pub fn read_row(r: &mut impl Read, arity: usize) -> Result<Row> {
    let mut row = Row::new();
    for _ in 0..arity {
        let tag = read_u8(r)?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_STRING => {
                let bytes = read_bytes(r)?;
                let s = String::from_utf8(bytes).map_err(|e| {
                    RowflowError::Execution(format!("spill row holds invalid utf-8: {e}"))
                })?;
                Value::String(s)
            }
            TAG_INTEGER => Value::Integer(i64::from_le_bytes(read_array(r)?)),
            TAG_NUMBER => Value::Number(f64::from_bits(u64::from_le_bytes(read_array(r)?))),
            TAG_BOOLEAN => Value::Boolean(read_u8(r)? != 0),
            TAG_DATE => {
                let millis = i64::from_le_bytes(read_array(r)?);
                let date = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    RowflowError::Execution(format!("spill row holds invalid date millis {millis}"))
                })?;
                Value::Date(date.naive_utc())
            }
            TAG_BINARY => Value::Binary(read_bytes(r)?),
            other => {
                return Err(RowflowError::Execution(format!(
                    "spill row holds unknown value tag {other}"
                )));
            }
        };
        row.push(value);
    }
    Ok(row)
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| RowflowError::Execution("cell larger than 4 GiB".to_string()))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>> {
    let len = u32::from_le_bytes(read_array(r)?) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u8(r: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_array<const N: usize>(r: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    #[test]
    fn encodes_and_decodes_every_kind() {
        let date = NaiveDate::from_ymd_opt(2021, 6, 15)
            .expect("date")
            .and_hms_opt(10, 30, 0)
            .expect("time");
        let row = Row::from(vec![
            Value::String("widget".into()),
            Value::Integer(-42),
            Value::Number(3.5),
            Value::Boolean(true),
            Value::Date(date),
            Value::Binary(vec![0, 255, 7]),
            Value::Null,
        ]);

        let mut buf = Vec::new();
        write_row(&mut buf, &row).expect("encode");
        let back = read_row(&mut Cursor::new(buf), row.arity()).expect("decode");
        assert_eq!(back, row);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let row = Row::from(vec![Value::String("hello".into())]);
        let mut buf = Vec::new();
        write_row(&mut buf, &row).expect("encode");
        buf.truncate(buf.len() - 2);
        assert!(read_row(&mut Cursor::new(buf), 1).is_err());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let buf = vec![9u8];
        let err = read_row(&mut Cursor::new(buf), 1).expect_err("unknown tag");
        assert!(err.to_string().contains("unknown value tag"));
    }
}
