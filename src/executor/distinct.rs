//! # Distinct
//!
//! Duplicate elimination on top of `ExternalSort`: the child is projected onto
//! the requested columns, sorted on every projected column, and a row is
//! emitted only when it differs from the previously emitted row. NULLs compare
//! equal to each other here, so at most one all-NULL row survives.
//!
//! Output is ascending on the projected columns.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::Result;

use super::{
    compare_rows, ensure_open, ExecContext, Executor, ExternalSort, Page, ProjectExecutor, Row,
    SortDirection,
};
use crate::memory::PageBudget;
use crate::types::Schema;

const OPERATOR: &str = "Distinct";

pub struct Distinct<E: Executor> {
    ctx: ExecContext,
    sort: ExternalSort<ProjectExecutor<E>>,
    keys: Vec<usize>,
    capacity: usize,
    pending: std::vec::IntoIter<Row>,
    previous: Option<Row>,
    opened: bool,
    exhausted: bool,
}

impl<E: Executor> Distinct<E> {
    pub fn new(ctx: ExecContext, child: E, projection: Vec<usize>, buffer_pages: usize) -> Self {
        let keys: Vec<usize> = (0..projection.len()).collect();
        let project = ProjectExecutor::new(ctx.clone(), child, projection);
        let sort = ExternalSort::new(
            ctx.clone(),
            project,
            keys.clone(),
            SortDirection::Ascending,
            buffer_pages,
        );
        Self {
            ctx,
            sort,
            keys,
            capacity: 0,
            pending: Vec::new().into_iter(),
            previous: None,
            opened: false,
            exhausted: false,
        }
    }

    /// Budget of the inner sort.
    pub fn sort_budget(&self) -> &Arc<PageBudget> {
        self.sort.budget()
    }
}

impl<E: Executor> Executor for Distinct<E> {
    fn open(&mut self) -> Result<()> {
        self.capacity = self.ctx.page_capacity(self.sort.schema())?;
        self.pending = Vec::new().into_iter();
        self.previous = None;
        self.exhausted = false;
        self.opened = true;
        self.sort.open()
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, OPERATOR)?;
        if self.exhausted {
            return Ok(None);
        }

        let mut out = Page::new(self.capacity);
        while !out.is_full() {
            let row = match self.pending.next() {
                Some(row) => row,
                None => match self.sort.next()? {
                    Some(page) => {
                        self.pending = page.into_rows().into_iter();
                        continue;
                    }
                    None => {
                        self.exhausted = true;
                        break;
                    }
                },
            };

            let duplicate = self
                .previous
                .as_ref()
                .is_some_and(|prev| compare_rows(prev, &row, &self.keys) == Ordering::Equal);
            if !duplicate {
                out.push(row.clone());
                self.previous = Some(row);
            }
        }
        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.pending = Vec::new().into_iter();
        self.previous = None;
        self.sort.close()
    }

    fn schema(&self) -> &Schema {
        self.sort.schema()
    }
}
