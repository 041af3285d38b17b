//! # Rows and Pages
//!
//! A `Row` is an owned, fixed-arity sequence of values. A `Page` is the unit
//! returned by `Executor::next`: between 1 and `capacity` rows, where the
//! capacity is fixed per operator from its output schema's row size.

use smallvec::SmallVec;

use crate::types::Value;

pub type Row = SmallVec<[Value<'static>; 16]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    rows: Vec<Row>,
    capacity: usize,
}

impl Page {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Wraps already-collected rows. `rows.len()` must not exceed `capacity`.
    pub fn from_rows(rows: Vec<Row>, capacity: usize) -> Self {
        debug_assert!(rows.len() <= capacity);
        Self { rows, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn push(&mut self, row: Row) {
        debug_assert!(!self.is_full(), "push onto a full page");
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Takes the accumulated rows, leaving an empty page of the same capacity.
    pub fn take(&mut self) -> Page {
        let capacity = self.capacity;
        std::mem::replace(self, Page::new(capacity))
    }

    /// Returns the accumulated rows as a page, or None when nothing has been
    /// pushed since the last flush.
    pub fn flush(&mut self) -> Option<Page> {
        if self.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }
}

impl IntoIterator for Page {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
