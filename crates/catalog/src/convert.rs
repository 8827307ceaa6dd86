//! Value-to-column conversion: the permissive INT/FLOAT pairing and the
//! DATETIME/STRING canonicalization applied on INSERT, UPDATE, and LOAD.

use common::{DbError, DbResult};
use types::{ColType, DateTime, Value};

use crate::meta::ColMeta;

/// Convert `value` to the column's type, or fail with the appropriate
/// typing error. INT and FLOAT convert into each other; a DATETIME
/// assigned to a CHAR column becomes its canonical string; a string
/// assigned to a DATETIME column must parse and be calendar-valid.
pub fn coerce_value(col: &ColMeta, value: &Value) -> DbResult<Value> {
    match (col.ty, value) {
        (ColType::Int, Value::Int(_)) | (ColType::Float, Value::Float(_)) => Ok(value.clone()),
        (ColType::Int, Value::Float(f)) => Ok(Value::Int(*f as i32)),
        (ColType::Float, Value::Int(i)) => Ok(Value::Float(*i as f32)),
        (ColType::Str, Value::Str(s)) => {
            if s.len() > col.len {
                return Err(DbError::StringOverflow);
            }
            Ok(value.clone())
        }
        (ColType::Str, Value::Datetime(dt)) => {
            let text = dt.to_string();
            if text.len() > col.len {
                return Err(DbError::StringOverflow);
            }
            Ok(Value::Str(text))
        }
        (ColType::Datetime, Value::Datetime(_)) => Ok(value.clone()),
        (ColType::Datetime, Value::Str(s)) => {
            let dt = DateTime::parse(s).ok_or_else(|| DbError::TypeOverflow {
                ty: "DATETIME".into(),
                val: s.clone(),
            })?;
            Ok(Value::Datetime(dt))
        }
        _ => Err(DbError::IncompatibleType {
            lhs: col.ty.to_string(),
            rhs: value.col_type().to_string(),
        }),
    }
}

/// Coerce and encode `value` into a column-width byte buffer.
pub fn value_to_bytes(col: &ColMeta, value: &Value) -> DbResult<Vec<u8>> {
    let coerced = coerce_value(col, value)?;
    let mut buf = vec![0u8; col.len];
    coerced
        .encode_into(col.ty, &mut buf)
        .ok_or(DbError::InvalidType)?;
    Ok(buf)
}

/// Build a full record image from one value per column.
pub fn record_from_values(cols: &[ColMeta], values: &[Value]) -> DbResult<Vec<u8>> {
    if cols.len() != values.len() {
        return Err(DbError::InvalidValueCount);
    }
    let record_size = cols.last().map_or(0, |c| c.offset + c.len);
    let mut record = vec![0u8; record_size];
    for (col, value) in cols.iter().zip(values) {
        let bytes = value_to_bytes(col, value)?;
        record[col.offset..col.offset + col.len].copy_from_slice(&bytes);
    }
    Ok(record)
}

/// Decode the value a column holds within a record image.
pub fn value_at(record: &[u8], col: &ColMeta) -> Value {
    Value::decode(col.ty, &record[col.offset..col.offset + col.len])
}
