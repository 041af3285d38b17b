use eyre::Result;

use super::util::validate_columns;
use super::{ensure_open, project_row, ExecContext, Executor, Page, Row};
use crate::types::Schema;

/// Narrows rows to the selected columns and re-pages them to the capacity of
/// the projected schema.
pub struct ProjectExecutor<E: Executor> {
    ctx: ExecContext,
    child: E,
    indices: Vec<usize>,
    schema: Schema,
    capacity: usize,
    pending: std::vec::IntoIter<Row>,
    opened: bool,
    exhausted: bool,
}

impl<E: Executor> ProjectExecutor<E> {
    pub fn new(ctx: ExecContext, child: E, indices: Vec<usize>) -> Self {
        let schema = child.schema().project(&indices);
        Self {
            ctx,
            child,
            indices,
            schema,
            capacity: 0,
            pending: Vec::new().into_iter(),
            opened: false,
            exhausted: false,
        }
    }

    pub fn child(&self) -> &E {
        &self.child
    }
}

impl<E: Executor> Executor for ProjectExecutor<E> {
    fn open(&mut self) -> Result<()> {
        validate_columns("ProjectExecutor", self.child.schema(), &self.indices)?;
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.child.open()?;
        self.pending = Vec::new().into_iter();
        self.opened = true;
        self.exhausted = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, "ProjectExecutor")?;
        if self.exhausted {
            return Ok(None);
        }

        let mut out = Page::new(self.capacity);
        while !out.is_full() {
            if let Some(row) = self.pending.next() {
                out.push(project_row(&row, &self.indices));
                continue;
            }
            match self.child.next()? {
                Some(page) => self.pending = page.into_rows().into_iter(),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.pending = Vec::new().into_iter();
        self.opened = false;
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::{collect_rows, MaterializedScan};
    use crate::types::{ColumnDef, DataType, Value};
    use smallvec::smallvec;

    #[test]
    fn projection_repages_to_narrower_rows() {
        let config = ExecConfig::builder().page_size(64).build().unwrap();
        let ctx = ExecContext::new(config);
        let schema = Schema::new(vec![
            ColumnDef::new("a", DataType::Int8),
            ColumnDef::varchar("b", Some(24)),
        ]);
        let rows: Vec<Row> = (0..10)
            .map(|i| smallvec![Value::Int(i), Value::from(format!("s{}", i))])
            .collect();
        let scan = MaterializedScan::new(ctx.clone(), schema, rows);
        let mut project = ProjectExecutor::new(ctx, scan, vec![0]);

        project.open().unwrap();
        let first = project.next().unwrap().unwrap();
        assert_eq!(first.capacity(), 8);
        assert_eq!(first.len(), 8);
        assert_eq!(first.rows()[0].len(), 1);
        project.close().unwrap();

        let rows = collect_rows(&mut project).unwrap();
        let values: Vec<i64> = rows.iter().map(|r| r[0].as_int().unwrap()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_column_fails_open() {
        let ctx = ExecContext::default();
        let schema = Schema::new(vec![ColumnDef::new("a", DataType::Int8)]);
        let scan = MaterializedScan::new(ctx.clone(), schema, Vec::new());
        let mut project = ProjectExecutor::new(ctx, scan, vec![3]);
        assert!(project.open().is_err());
    }
}
