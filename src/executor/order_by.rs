//! # OrderBy
//!
//! The user-visible ORDER BY: sorts the child with `ExternalSort` in the
//! requested direction, then narrows each row to the selected columns and
//! re-pages the result to the projected page capacity. Sort keys refer to
//! the child's columns, so a query may order by a column it does not return.

use std::sync::Arc;

use eyre::Result;

use super::{ExecContext, Executor, ExternalSort, Page, ProjectExecutor, SortDirection};
use crate::memory::PageBudget;
use crate::types::Schema;

pub struct OrderBy<E: Executor> {
    inner: ProjectExecutor<ExternalSort<E>>,
}

impl<E: Executor> OrderBy<E> {
    pub fn new(
        ctx: ExecContext,
        child: E,
        projection: Vec<usize>,
        sort_keys: Vec<usize>,
        direction: SortDirection,
        buffer_pages: usize,
    ) -> Self {
        let sort = ExternalSort::new(ctx.clone(), child, sort_keys, direction, buffer_pages);
        Self {
            inner: ProjectExecutor::new(ctx, sort, projection),
        }
    }

    pub fn sort_budget(&self) -> &Arc<PageBudget> {
        self.inner.child().budget()
    }
}

impl<E: Executor> Executor for OrderBy<E> {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn next(&mut self) -> Result<Option<Page>> {
        self.inner.next()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::{collect_rows, MaterializedScan, Row};
    use crate::types::{ColumnDef, DataType, Value};
    use smallvec::smallvec;
    use tempfile::tempdir;

    #[test]
    fn orders_by_hidden_column_descending() {
        let dir = tempdir().unwrap();
        let config = ExecConfig::builder()
            .page_size(64)
            .spill_dir(dir.path())
            .build()
            .unwrap();
        let ctx = ExecContext::new(config);
        let schema = Schema::new(vec![
            ColumnDef::varchar("name", Some(8)),
            ColumnDef::new("score", DataType::Int8),
        ]);
        let rows: Vec<Row> = (0..30)
            .map(|i| smallvec![Value::from(format!("n{}", i)), Value::Int((i * 7) % 30)])
            .collect();
        let scan = MaterializedScan::new(ctx.clone(), schema, rows);
        let mut order = OrderBy::new(ctx, scan, vec![0], vec![1], SortDirection::Descending, 2);

        let out = collect_rows(&mut order).unwrap();
        assert_eq!(out.len(), 30);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0], Value::from("n17".to_string()));
        assert_eq!(out[29][0], Value::from("n0".to_string()));
        assert!(order.sort_budget().peak() <= 2);
    }
}
