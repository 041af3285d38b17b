use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use eyre::{ensure, Result};

use super::Row;
use crate::types::{Schema, Value};

/// Equality predicate between a left column and a right column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: usize,
    pub right: usize,
}

impl JoinCondition {
    pub fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }
}

/// Direction of an ORDER BY or of the sort engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// Compares `a[a_keys[i]]` with `b[b_keys[i]]` lexicographically.
pub fn compare_keys(
    a: &[Value<'_>],
    a_keys: &[usize],
    b: &[Value<'_>],
    b_keys: &[usize],
) -> Ordering {
    for (&ai, &bi) in a_keys.iter().zip(b_keys.iter()) {
        let ord = match (a.get(ai), b.get(bi)) {
            (Some(av), Some(bv)) => av.sort_cmp(bv),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compares two rows of the same schema on the same key columns.
pub fn compare_rows(a: &[Value<'_>], b: &[Value<'_>], keys: &[usize]) -> Ordering {
    compare_keys(a, keys, b, keys)
}

/// True when every condition holds. NULL never satisfies a condition.
pub fn rows_match(left: &[Value<'_>], right: &[Value<'_>], conditions: &[JoinCondition]) -> bool {
    conditions.iter().all(|c| match (left.get(c.left), right.get(c.right)) {
        (Some(l), Some(r)) => l.join_eq(r),
        _ => false,
    })
}

/// Seeded hash of one value; independent seeds give independent functions.
pub fn hash_value_seeded(value: &Value<'_>, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    value.hash_to(&mut hasher);
    hasher.finish()
}

/// Left columns followed by right columns.
pub fn join_rows(left: &[Value<'static>], right: &[Value<'static>]) -> Row {
    let mut out = Row::with_capacity(left.len() + right.len());
    out.extend(left.iter().cloned());
    out.extend(right.iter().cloned());
    out
}

pub fn project_row(row: &[Value<'static>], indices: &[usize]) -> Row {
    indices
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

pub fn validate_columns(operator: &str, schema: &Schema, indices: &[usize]) -> Result<()> {
    for &idx in indices {
        ensure!(
            idx < schema.len(),
            "{}: column index {} out of range for {} columns",
            operator,
            idx,
            schema.len()
        );
    }
    Ok(())
}

pub fn validate_conditions(
    operator: &str,
    left: &Schema,
    right: &Schema,
    conditions: &[JoinCondition],
) -> Result<()> {
    ensure!(
        !conditions.is_empty(),
        "{}: at least one join condition is required",
        operator
    );
    for c in conditions {
        ensure!(
            c.left < left.len() && c.right < right.len(),
            "{}: join condition ({}, {}) out of range",
            operator,
            c.left,
            c.right
        );
    }
    Ok(())
}
