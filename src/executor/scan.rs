//! # Leaf Scans
//!
//! - `MaterializedScan` pages out rows already held in memory. It stands in for
//!   a base-table scan wherever the operator tree needs a leaf.
//! - `SpillScan` pages out a finished spill file it owns and deletes the file
//!   on `close()`. Hash join hands the left file of an overflowing partition
//!   to the fallback block nested loop join through this type. Its reader
//!   handle is counted on the budget it is given.

use eyre::Result;

use std::sync::Arc;

use super::{ensure_open, ExecContext, Executor, Page, Row};
use crate::memory::PageBudget;
use crate::spill::{SpillFile, SpillReader};
use crate::types::Schema;

pub struct MaterializedScan {
    ctx: ExecContext,
    schema: Schema,
    rows: Vec<Row>,
    capacity: usize,
    pos: usize,
    opened: bool,
}

impl MaterializedScan {
    pub fn new(ctx: ExecContext, schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            ctx,
            schema,
            rows,
            capacity: 0,
            pos: 0,
            opened: false,
        }
    }
}

impl Executor for MaterializedScan {
    fn open(&mut self) -> Result<()> {
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.pos = 0;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, "MaterializedScan")?;
        if self.pos >= self.rows.len() {
            return Ok(None);
        }
        let end = (self.pos + self.capacity).min(self.rows.len());
        let rows = self.rows[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(Page::from_rows(rows, self.capacity)))
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct SpillScan {
    ctx: ExecContext,
    schema: Schema,
    file: Option<SpillFile>,
    reader: Option<SpillReader>,
    budget: Arc<PageBudget>,
    capacity: usize,
    opened: bool,
    exhausted: bool,
}

impl SpillScan {
    pub fn new(
        ctx: ExecContext,
        schema: Schema,
        file: SpillFile,
        budget: Arc<PageBudget>,
    ) -> Self {
        Self {
            ctx,
            schema,
            file: Some(file),
            reader: None,
            budget,
            capacity: 0,
            opened: false,
            exhausted: false,
        }
    }
}

impl Executor for SpillScan {
    fn open(&mut self) -> Result<()> {
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.reader = match &self.file {
            Some(file) => Some(file.open_reader(&self.budget)?),
            None => None,
        };
        self.exhausted = self.reader.is_none();
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, "SpillScan")?;
        if self.exhausted {
            return Ok(None);
        }
        let page = match self.reader.as_mut() {
            Some(reader) => reader.read_page(self.capacity)?,
            None => None,
        };
        match page {
            Some(page) if !page.is_empty() => Ok(Some(page)),
            _ => {
                self.exhausted = true;
                self.reader = None;
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.opened = false;
        if let Some(mut file) = self.file.take() {
            file.remove()?;
        }
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::{collect_rows, exec_error, ExecError};
    use crate::spill::SpillWriter;
    use crate::types::{ColumnDef, DataType, Value};
    use smallvec::smallvec;
    use tempfile::tempdir;

    fn int_schema() -> Schema {
        Schema::new(vec![ColumnDef::new("v", DataType::Int8)])
    }

    #[test]
    fn materialized_scan_pages_by_capacity() {
        let dir = tempdir().unwrap();
        let config = ExecConfig::builder()
            .page_size(64)
            .spill_dir(dir.path())
            .build()
            .unwrap();
        let ctx = ExecContext::new(config);
        let rows: Vec<Row> = (0..20).map(|i| smallvec![Value::Int(i)]).collect();
        let mut scan = MaterializedScan::new(ctx, int_schema(), rows);

        scan.open().unwrap();
        let mut sizes = Vec::new();
        while let Some(page) = scan.next().unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![8, 8, 4]);
        assert!(scan.next().unwrap().is_none());
        scan.close().unwrap();
    }

    #[test]
    fn next_before_open_is_protocol_error() {
        let mut scan = MaterializedScan::new(ExecContext::default(), int_schema(), Vec::new());
        let err = scan.next().unwrap_err();
        assert!(matches!(
            exec_error(&err),
            Some(ExecError::NotOpen { .. })
        ));
    }

    #[test]
    fn spill_scan_reads_and_deletes_its_file() {
        let dir = tempdir().unwrap();
        let config = ExecConfig::builder().spill_dir(dir.path()).build().unwrap();
        let ctx = ExecContext::new(config);
        let path = ctx.spill_path("test", 1, "p0");

        let budget = PageBudget::new("HashJoin", 3);
        let mut writer = SpillWriter::create(path.clone(), 4, &budget).unwrap();
        for i in 0..6 {
            writer.push_row(&[Value::Int(i)]).unwrap();
        }
        let file = writer.finish().unwrap();

        let mut scan = SpillScan::new(ctx, int_schema(), file, budget.clone());
        let rows = collect_rows(&mut scan).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(!path.exists());
        assert_eq!(budget.open_files(), 0);
        assert_eq!(budget.peak_files(), 1);
        scan.close().unwrap();
    }
}
