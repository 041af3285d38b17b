//! # GroupBy (no aggregation)
//!
//! Sorts the child on the group-by columns and emits one projected row per
//! group. Aggregates are not evaluated: any `OutputColumn::Aggregate` is
//! rejected by `open()` before any input is read.
//!
//! Every output column must be functionally dependent on the group key. The
//! operator verifies this while it skips the remaining rows of a group; a
//! row whose projected values differ from the group's first row fails with
//! `ExecError::GroupInvariant`.
//!
//! Output is ascending on the group-by columns.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::{bail, Result};

use super::util::validate_columns;
use super::{
    compare_rows, ensure_open, project_row, ExecContext, ExecError, Executor, ExternalSort, Page,
    Row, SortDirection,
};
use crate::memory::PageBudget;
use crate::types::{ColumnDef, DataType, Schema};

const OPERATOR: &str = "GroupBy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count { distinct: bool },
    Sum { column: usize },
    Avg { column: usize },
    Min { column: usize },
    Max { column: usize },
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count { distinct: false } => "COUNT",
            AggregateFunction::Count { distinct: true } => "COUNT(DISTINCT)",
            AggregateFunction::Sum { .. } => "SUM",
            AggregateFunction::Avg { .. } => "AVG",
            AggregateFunction::Min { .. } => "MIN",
            AggregateFunction::Max { .. } => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputColumn {
    Column(usize),
    Aggregate(AggregateFunction),
}

pub struct GroupBy<E: Executor> {
    ctx: ExecContext,
    sort: ExternalSort<E>,
    output: Vec<OutputColumn>,
    group_by: Vec<usize>,
    key_positions: Vec<usize>,
    projection: Vec<usize>,
    schema: Schema,
    capacity: usize,
    pending: std::vec::IntoIter<Row>,
    current_key: Option<Row>,
    current_out: Option<Row>,
    opened: bool,
    exhausted: bool,
}

impl<E: Executor> GroupBy<E> {
    pub fn new(
        ctx: ExecContext,
        child: E,
        output: Vec<OutputColumn>,
        group_by: Vec<usize>,
        buffer_pages: usize,
    ) -> Self {
        let schema = Schema::new(
            output
                .iter()
                .map(|col| match col {
                    OutputColumn::Column(idx) => child
                        .schema()
                        .column(*idx)
                        .cloned()
                        .unwrap_or_else(|| ColumnDef::new(format!("col{}", idx), DataType::Int8)),
                    OutputColumn::Aggregate(func) => {
                        ColumnDef::new(func.name().to_ascii_lowercase(), DataType::Float8)
                    }
                })
                .collect(),
        );
        let projection = output
            .iter()
            .filter_map(|col| match col {
                OutputColumn::Column(idx) => Some(*idx),
                OutputColumn::Aggregate(_) => None,
            })
            .collect();
        let sort = ExternalSort::new(
            ctx.clone(),
            child,
            group_by.clone(),
            SortDirection::Ascending,
            buffer_pages,
        );
        Self {
            ctx,
            sort,
            output,
            key_positions: (0..group_by.len()).collect(),
            group_by,
            projection,
            schema,
            capacity: 0,
            pending: Vec::new().into_iter(),
            current_key: None,
            current_out: None,
            opened: false,
            exhausted: false,
        }
    }

    pub fn sort_budget(&self) -> &Arc<PageBudget> {
        self.sort.budget()
    }

    fn check_group(&self, out: &Row) -> Result<()> {
        if let Some(first) = &self.current_out {
            for (column, (a, b)) in first.iter().zip(out.iter()).enumerate() {
                if a.sort_cmp(b) != Ordering::Equal {
                    bail!(ExecError::GroupInvariant { column });
                }
            }
        }
        Ok(())
    }
}

impl<E: Executor> Executor for GroupBy<E> {
    fn open(&mut self) -> Result<()> {
        if let Some(OutputColumn::Aggregate(func)) = self
            .output
            .iter()
            .find(|c| matches!(c, OutputColumn::Aggregate(_)))
        {
            bail!(ExecError::Unsupported {
                operator: OPERATOR,
                feature: format!("aggregate {}", func.name()),
            });
        }
        validate_columns(OPERATOR, self.sort.schema(), &self.projection)?;
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.pending = Vec::new().into_iter();
        self.current_key = None;
        self.current_out = None;
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

            let key = project_row(&row, &self.group_by);
            let projected = project_row(&row, &self.projection);
            let same_group = self
                .current_key
                .as_ref()
                .is_some_and(|k| compare_rows(k, &key, &self.key_positions) == Ordering::Equal);

            if same_group {
                self.check_group(&projected)?;
            } else {
                out.push(projected.clone());
                self.current_key = Some(key);
                self.current_out = Some(projected);
            }
        }
        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.pending = Vec::new().into_iter();
        self.current_key = None;
        self.current_out = None;
        self.sort.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
