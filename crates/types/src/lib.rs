//! Column types and runtime values, plus their fixed-width on-page
//! encoding and the typed comparison used by the B+ tree.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Widest STRING column the storage layer accepts, in bytes.
pub const MAX_STRING_LEN: usize = 512;

/// Storage type of a table column.
///
/// `Str` carries its fixed byte length; the other types have a fixed
/// width (`Int`/`Float` 4 bytes, `Datetime` 8 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColType {
    Int,
    Float,
    Str,
    Datetime,
}

impl ColType {
    /// Fixed byte width, or `None` for `Str` (length comes from the schema).
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ColType::Int | ColType::Float => Some(4),
            ColType::Datetime => Some(8),
            ColType::Str => None,
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColType::Int => "INT",
            ColType::Float => "FLOAT",
            ColType::Str => "CHAR",
            ColType::Datetime => "DATETIME",
        };
        f.write_str(name)
    }
}

/// Calendar timestamp packed into a u64 as
/// `year<<40 | month<<32 | day<<24 | hour<<16 | minute<<8 | second`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub fn encode(self) -> u64 {
        (self.year as u64) << 40
            | (self.month as u64) << 32
            | (self.day as u64) << 24
            | (self.hour as u64) << 16
            | (self.minute as u64) << 8
            | self.second as u64
    }

    pub fn decode(code: u64) -> Self {
        Self {
            year: ((code >> 40) & 0xFFFF) as u16,
            month: ((code >> 32) & 0xFF) as u8,
            day: ((code >> 24) & 0xFF) as u8,
            hour: ((code >> 16) & 0xFF) as u8,
            minute: ((code >> 8) & 0xFF) as u8,
            second: (code & 0xFF) as u8,
        }
    }

    /// Parse `YYYY-MM-DD HH:MM:SS`, returning `None` when the shape or
    /// the calendar is invalid.
    pub fn parse(text: &str) -> Option<Self> {
        let (date, time) = text.split_once(' ')?;
        let mut date_parts = date.splitn(3, '-');
        let year: u16 = date_parts.next()?.parse().ok()?;
        let month: u8 = date_parts.next()?.parse().ok()?;
        let day: u8 = date_parts.next()?.parse().ok()?;
        let mut time_parts = time.splitn(3, ':');
        let hour: u8 = time_parts.next()?.parse().ok()?;
        let minute: u8 = time_parts.next()?.parse().ok()?;
        let second: u8 = time_parts.next()?.parse().ok()?;
        let dt = Self { year, month, day, hour, minute, second };
        dt.is_valid().then_some(dt)
    }

    /// Valid iff 1000..=9999 / calendar-valid month+day (leap years
    /// included) / 0-23 / 0-59 / 0-59.
    pub fn is_valid(self) -> bool {
        if !(1000..=9999).contains(&self.year) {
            return false;
        }
        if !(1..=12).contains(&self.month) {
            return false;
        }
        if self.day < 1 || self.day > days_in_month(self.year, self.month) {
            return false;
        }
        self.hour <= 23 && self.minute <= 59 && self.second <= 59
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// A runtime value of one of the four column types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    Datetime(DateTime),
}

impl Value {
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Str,
            Value::Datetime(_) => ColType::Datetime,
        }
    }

    /// Encode into a fixed-width column slot. Strings are zero-padded to
    /// `buf.len()`; returns `None` when the value does not fit the slot
    /// or the types disagree.
    pub fn encode_into(&self, ty: ColType, buf: &mut [u8]) -> Option<()> {
        match (self, ty) {
            (Value::Int(v), ColType::Int) if buf.len() == 4 => {
                buf.copy_from_slice(&v.to_le_bytes());
                Some(())
            }
            (Value::Float(v), ColType::Float) if buf.len() == 4 => {
                buf.copy_from_slice(&v.to_le_bytes());
                Some(())
            }
            (Value::Str(s), ColType::Str) => {
                if s.len() > buf.len() {
                    return None;
                }
                buf[..s.len()].copy_from_slice(s.as_bytes());
                buf[s.len()..].fill(0);
                Some(())
            }
            (Value::Datetime(dt), ColType::Datetime) if buf.len() == 8 => {
                buf.copy_from_slice(&dt.encode().to_le_bytes());
                Some(())
            }
            _ => None,
        }
    }

    /// Decode a fixed-width column slot back into a value. String slots
    /// drop their zero padding.
    pub fn decode(ty: ColType, bytes: &[u8]) -> Value {
        match ty {
            ColType::Int => Value::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Float => Value::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ColType::Str => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            ColType::Datetime => {
                Value::Datetime(DateTime::decode(u64::from_le_bytes(bytes[..8].try_into().unwrap())))
            }
        }
    }

    /// Typed comparison. INT and FLOAT compare against each other through
    /// f64; everything else requires matching types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Int(a), Value::Float(b)) => Some((*a as f64).total_cmp(&(*b as f64))),
            (Value::Float(a), Value::Int(b)) => Some((*a as f64).total_cmp(&(*b as f64))),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// True when `compare` would succeed for the two column types.
    pub fn types_comparable(lhs: ColType, rhs: ColType) -> bool {
        lhs == rhs
            || matches!(
                (lhs, rhs),
                (ColType::Int, ColType::Float) | (ColType::Float, ColType::Int)
            )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:.6}"),
            Value::Str(s) => f.write_str(s),
            Value::Datetime(dt) => write!(f, "{dt}"),
        }
    }
}

/// Compare two composite keys column by column: per-column typed
/// compare, lexicographic across columns. Both keys must be densely
/// packed in the given column order.
pub fn compare_keys(a: &[u8], b: &[u8], col_types: &[ColType], col_lens: &[usize]) -> Ordering {
    let mut off = 0;
    for (&ty, &len) in col_types.iter().zip(col_lens) {
        let lhs = &a[off..off + len];
        let rhs = &b[off..off + len];
        let ord = match ty {
            ColType::Int => {
                let x = i32::from_le_bytes(lhs[..4].try_into().unwrap());
                let y = i32::from_le_bytes(rhs[..4].try_into().unwrap());
                x.cmp(&y)
            }
            ColType::Float => {
                let x = f32::from_le_bytes(lhs[..4].try_into().unwrap());
                let y = f32::from_le_bytes(rhs[..4].try_into().unwrap());
                x.total_cmp(&y)
            }
            ColType::Str => lhs.cmp(rhs),
            ColType::Datetime => {
                let x = u64::from_le_bytes(lhs[..8].try_into().unwrap());
                let y = u64::from_le_bytes(rhs[..8].try_into().unwrap());
                x.cmp(&y)
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
        off += len;
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn datetime_round_trips_through_u64() {
        let dt = DateTime { year: 2024, month: 2, day: 29, hour: 23, minute: 59, second: 59 };
        assert!(dt.is_valid());
        assert_eq!(DateTime::decode(dt.encode()), dt);
    }

    #[test]
    fn datetime_rejects_bad_calendars() {
        assert!(DateTime::parse("2023-02-29 00:00:00").is_none());
        assert!(DateTime::parse("2024-02-29 00:00:00").is_some());
        assert!(DateTime::parse("1900-02-29 00:00:00").is_none());
        assert!(DateTime::parse("2000-02-29 12:30:30").is_some());
        assert!(DateTime::parse("0999-01-01 00:00:00").is_none());
        assert!(DateTime::parse("2024-13-01 00:00:00").is_none());
        assert!(DateTime::parse("2024-06-31 00:00:00").is_none());
        assert!(DateTime::parse("2024-06-30 24:00:00").is_none());
        assert!(DateTime::parse("garbage").is_none());
    }

    #[test]
    fn datetime_display_is_canonical() {
        let dt = DateTime::parse("2024-6-1 3:4:5").unwrap();
        assert_eq!(dt.to_string(), "2024-06-01 03:04:05");
    }

    #[test]
    fn int_float_compare_across_types() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Less));
        assert_eq!(Value::Float(2.0).compare(&Value::Int(2)), Some(Equal));
        assert_eq!(Value::Int(3).compare(&Value::Float(2.5)), Some(Greater));
        assert_eq!(Value::Int(1).compare(&Value::Str("1".into())), None);
    }

    #[test]
    fn string_slots_are_zero_padded() {
        let mut buf = [0xAAu8; 8];
        Value::Str("ab".into()).encode_into(ColType::Str, &mut buf).unwrap();
        assert_eq!(&buf, b"ab\0\0\0\0\0\0");
        assert_eq!(Value::decode(ColType::Str, &buf), Value::Str("ab".into()));
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut buf = [0u8; 2];
        assert!(Value::Str("abc".into()).encode_into(ColType::Str, &mut buf).is_none());
    }

    #[test]
    fn float_display_keeps_six_decimals() {
        assert_eq!(Value::Float(55.5).to_string(), "55.500000");
    }

    #[test]
    fn composite_key_compare_is_lexicographic() {
        let types = [ColType::Int, ColType::Str];
        let lens = [4usize, 4usize];
        let key = |i: i32, s: &str| {
            let mut buf = vec![0u8; 8];
            Value::Int(i).encode_into(ColType::Int, &mut buf[..4]).unwrap();
            Value::Str(s.into()).encode_into(ColType::Str, &mut buf[4..]).unwrap();
            buf
        };
        assert_eq!(compare_keys(&key(1, "b"), &key(2, "a"), &types, &lens), Less);
        assert_eq!(compare_keys(&key(2, "a"), &key(2, "b"), &types, &lens), Less);
        assert_eq!(compare_keys(&key(2, "b"), &key(2, "b"), &types, &lens), Equal);
    }

    proptest! {
        #[test]
        fn int_key_order_matches_value_order(a in any::<i32>(), b in any::<i32>()) {
            let enc = |v: i32| {
                let mut buf = vec![0u8; 4];
                Value::Int(v).encode_into(ColType::Int, &mut buf).unwrap();
                buf
            };
            let ord = compare_keys(&enc(a), &enc(b), &[ColType::Int], &[4]);
            prop_assert_eq!(ord, a.cmp(&b));
        }

        #[test]
        fn datetime_encoding_preserves_order(a in 1000u16..=9999, b in 1000u16..=9999, m in 1u8..=12, d in 1u8..=28) {
            let x = DateTime { year: a, month: m, day: d, hour: 0, minute: 0, second: 0 };
            let y = DateTime { year: b, month: m, day: d, hour: 0, minute: 0, second: 0 };
            prop_assert_eq!(x.encode().cmp(&y.encode()), x.cmp(&y));
        }

        #[test]
        fn value_slot_round_trip(v in any::<i32>()) {
            let mut buf = [0u8; 4];
            Value::Int(v).encode_into(ColType::Int, &mut buf).unwrap();
            prop_assert_eq!(Value::decode(ColType::Int, &buf), Value::Int(v));
        }
    }
}
