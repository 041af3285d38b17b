//! # Runtime Value Representation
//!
//! This module provides `Value<'a>`, the runtime representation of one column
//! of one row. Values use `Cow` for text and blob payloads so a value decoded
//! from a spill buffer can borrow, while operators keep owned
//! `Value<'static>` rows between `next()` calls.
//!
//! ## Value Variants
//!
//! | Variant | Rust Type | Description |
//! |---------|-----------|-------------|
//! | Null | - | SQL NULL |
//! | Int | i64 | 64-bit signed integer |
//! | Float | f64 | 64-bit floating point |
//! | Text | Cow<str> | UTF-8 string |
//! | Blob | Cow<[u8]> | Binary data |
//! | Uuid | [u8; 16] | UUID bytes |
//! | TimestampTz | {micros, offset} | Timestamp with timezone |
//! | Decimal | {digits, scale} | Fixed-point decimal |
//!
//! ## Ordering
//!
//! Operators need a deterministic total order, so `sort_cmp` never returns
//! UNKNOWN:
//!
//! - NULL sorts before every other value and equals NULL
//! - Int and Float compare by exact numeric value; an i64 is never rounded
//!   to f64, so `Int(2^53 + 1)` is greater than `Float(2^53)`
//! - `-0.0` equals `0.0`, and NaN equals NaN and sorts above every number
//! - Decimals compare numerically after scale normalization
//! - Remaining cross-type pairs order by rank:
//!   numbers < Decimal < Text < Blob < Uuid < TimestampTz
//!
//! ## Equality for Joins
//!
//! `join_eq` is `sort_cmp == Equal` except that NULL never matches anything,
//! NULL included. Every join strategy uses it so the strategies agree.
//!
//! ## Hashing
//!
//! `hash_to` is consistent with `sort_cmp`: values that compare equal hash
//! equal. Integral floats in i64 range (both zeros included) hash as the
//! matching integer, every NaN hashes alike and decimals hash in normalized
//! form.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Runtime value representation for SQL values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i64),
    Float(f64),
    Text(Cow<'a, str>),
    Blob(Cow<'a, [u8]>),
    Uuid([u8; 16]),
    TimestampTz { micros: i64, offset_secs: i32 },
    Decimal { digits: i128, scale: i16 },
}

impl<'a> Value<'a> {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Decimal { .. } => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
            Value::Uuid(_) => 5,
            Value::TimestampTz { .. } => 6,
        }
    }

    /// Total order used by sort, distinct, group-by and merge join.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,

            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => compare_floats(*a, *b),
            (Value::Int(i), Value::Float(f)) => compare_int_float(*i, *f),
            (Value::Float(f), Value::Int(i)) => compare_int_float(*i, *f).reverse(),

            (
                Value::Decimal {
                    digits: da,
                    scale: sa,
                },
                Value::Decimal {
                    digits: db,
                    scale: sb,
                },
            ) => compare_decimals(*da, *sa, *db, *sb),

            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (
                Value::TimestampTz {
                    micros: ma,
                    offset_secs: oa,
                },
                Value::TimestampTz {
                    micros: mb,
                    offset_secs: ob,
                },
            ) => ma.cmp(mb).then(oa.cmp(ob)),

            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Equality used by join predicates. NULL matches nothing.
    pub fn join_eq(&self, other: &Value) -> bool {
        !self.is_null() && !other.is_null() && self.sort_cmp(other) == Ordering::Equal
    }

    /// Hashes this value consistently with `sort_cmp`.
    pub fn hash_to<H: Hasher>(&self, hasher: &mut H) {
        match self {
            Value::Null => 0u8.hash(hasher),
            Value::Int(i) => {
                1u8.hash(hasher);
                i.hash(hasher);
            }
            Value::Float(f) => match integral_float(*f) {
                Some(i) => {
                    1u8.hash(hasher);
                    i.hash(hasher);
                }
                None if f.is_nan() => {
                    2u8.hash(hasher);
                    f64::NAN.to_bits().hash(hasher);
                }
                None => {
                    2u8.hash(hasher);
                    f.to_bits().hash(hasher);
                }
            },
            Value::Decimal { digits, scale } => {
                let (digits, scale) = normalize_decimal(*digits, *scale);
                3u8.hash(hasher);
                digits.hash(hasher);
                scale.hash(hasher);
            }
            Value::Text(s) => {
                4u8.hash(hasher);
                s.hash(hasher);
            }
            Value::Blob(b) => {
                5u8.hash(hasher);
                b.hash(hasher);
            }
            Value::Uuid(u) => {
                6u8.hash(hasher);
                u.hash(hasher);
            }
            Value::TimestampTz {
                micros,
                offset_secs,
            } => {
                7u8.hash(hasher);
                micros.hash(hasher);
                offset_secs.hash(hasher);
            }
        }
    }

    /// Clones this value to a fully-owned static lifetime.
    pub fn to_owned_static(&self) -> Value<'static> {
        match self {
            Value::Null => Value::Null,
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Float(*f),
            Value::Text(s) => Value::Text(Cow::Owned(s.to_string())),
            Value::Blob(b) => Value::Blob(Cow::Owned(b.to_vec())),
            Value::Uuid(u) => Value::Uuid(*u),
            Value::TimestampTz {
                micros,
                offset_secs,
            } => Value::TimestampTz {
                micros: *micros,
                offset_secs: *offset_secs,
            },
            Value::Decimal { digits, scale } => Value::Decimal {
                digits: *digits,
                scale: *scale,
            },
        }
    }
}

/// 2^63 as f64; every finite float below it and at or above -2^63 truncates
/// to an i64 without loss.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// The i64 equal to `f`, if `f` is integral and in range. Both zeros map to 0.
fn integral_float(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

/// Numeric order with `-0.0 == 0.0`; NaN equals NaN and sorts last.
fn compare_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compares `i` with `f` without rounding `i` through f64.
fn compare_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= I64_BOUND {
        return Ordering::Less;
    }
    if f < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let frac = f - whole;
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        ord => ord,
    }
}

fn normalize_decimal(mut digits: i128, mut scale: i16) -> (i128, i16) {
    if digits == 0 {
        return (0, 0);
    }
    while scale > 0 && digits % 10 == 0 {
        digits /= 10;
        scale -= 1;
    }
    (digits, scale)
}

fn compare_decimals(da: i128, sa: i16, db: i128, sb: i16) -> Ordering {
    let (da, sa) = normalize_decimal(da, sa);
    let (db, sb) = normalize_decimal(db, sb);
    if sa == sb {
        return da.cmp(&db);
    }

    // Rescale the operand with the smaller scale; on overflow its magnitude
    // dominates, so its sign decides.
    let (lo_digits, lo_scale, hi_digits, hi_scale, flipped) = if sa < sb {
        (da, sa, db, sb, false)
    } else {
        (db, sb, da, sa, true)
    };
    let factor = 10i128.checked_pow((hi_scale - lo_scale) as u32);
    let ord = match factor.and_then(|f| lo_digits.checked_mul(f)) {
        Some(scaled) => scaled.cmp(&hi_digits),
        None => lo_digits.cmp(&0),
    };
    if flipped {
        ord.reverse()
    } else {
        ord
    }
}

impl From<i64> for Value<'static> {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value<'static> {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value<'static> {
    fn from(v: String) -> Self {
        Value::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Text(Cow::Borrowed(v))
    }
}
