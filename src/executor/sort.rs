//! # External Merge Sort
//!
//! `ExternalSort` orders an input of any size using B buffer pages and
//! temporary run files. It is the building block of `Distinct`, `GroupBy`,
//! `OrderBy` and `SortMergeJoin`.
//!
//! ## Phase 1: Run Generation (in `open()`)
//!
//! Pull up to B pages from the child, sort the rows in memory with a stable
//! sort and write them to a new run file. Repeat until the child is exhausted,
//! then close the child.
//!
//! ## Phase 2: Merge Passes (in `open()`)
//!
//! While more than one run exists, merge consecutive groups of up to
//! `max(B-1, 2)` runs into new runs. A binary heap holds the head row of
//! each participating run, ordered by key and then by the run's position in
//! the group, so rows with equal keys leave in input order. Consumed input
//! runs are deleted as soon as their group is merged.
//!
//! ```text
//! pass 0:  [r0] [r1] [r2] [r3] [r4] [r5] [r6]        B = 4, fan-in 3
//! pass 1:  [r0 r1 r2] [r3 r4 r5] [r6]
//! pass 2:  [r0..r6]
//! ```
//!
//! ## Output
//!
//! `next()` streams the single remaining run one page at a time and deletes it
//! at end of stream. An empty input creates no run at all.
//!
//! ## Page Budget
//!
//! Run generation holds at most B pages. A merge holds one decoded page per
//! input run plus the page being written, capped at B: at B = 2 the two pages
//! both hold inputs and merged rows are framed directly by the run writer.
//!
//! ## Temp Files
//!
//! `{spill_dir}/sort-{instance}-run-{pass}-{index}.spill`

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use smallvec::SmallVec;

use super::util::validate_columns;
use super::{
    check_budget, compare_rows, ensure_open, ExecContext, Executor, Page, Row, SortDirection,
};
use crate::config::{MIN_MERGE_FAN_IN, MIN_SORT_BUFFER_PAGES};
use crate::memory::PageBudget;
use crate::spill::{SpillFile, SpillReader, SpillWriter};
use crate::types::{Schema, Value};

const OPERATOR: &str = "ExternalSort";

pub struct ExternalSort<E: Executor> {
    ctx: ExecContext,
    child: E,
    keys: Vec<usize>,
    direction: SortDirection,
    buffer_pages: usize,
    instance: u64,
    budget: Arc<PageBudget>,
    capacity: usize,
    runs: VecDeque<SpillFile>,
    final_run: Option<SpillFile>,
    output: Option<SpillReader>,
    run_count: usize,
    merge_passes: usize,
    child_open: bool,
    opened: bool,
    exhausted: bool,
}

impl<E: Executor> ExternalSort<E> {
    pub fn new(
        ctx: ExecContext,
        child: E,
        keys: Vec<usize>,
        direction: SortDirection,
        buffer_pages: usize,
    ) -> Self {
        let instance = ctx.next_instance_id();
        Self {
            ctx,
            child,
            keys,
            direction,
            buffer_pages,
            instance,
            budget: PageBudget::new(OPERATOR, buffer_pages),
            capacity: 0,
            runs: VecDeque::new(),
            final_run: None,
            output: None,
            run_count: 0,
            merge_passes: 0,
            child_open: false,
            opened: false,
            exhausted: false,
        }
    }

    /// Runs written by run generation.
    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn merge_passes(&self) -> usize {
        self.merge_passes
    }

    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    fn fan_in(&self) -> usize {
        self.buffer_pages.saturating_sub(1).max(MIN_MERGE_FAN_IN)
    }

    fn run_path(&self, pass: usize, index: usize) -> PathBuf {
        self.ctx
            .spill_path("sort", self.instance, format!("run-{}-{}", pass, index))
    }

    fn generate_runs(&mut self) -> Result<()> {
        let keys = self.keys.clone();
        let direction = self.direction;

        loop {
            let mut reservation = self.budget.reserve(0)?;
            let mut rows: Vec<Row> = Vec::new();
            let mut child_done = false;

            while reservation.pages() < self.buffer_pages {
                match self.child.next()? {
                    Some(page) => {
                        reservation.grow(1)?;
                        rows.extend(page);
                    }
                    None => {
                        child_done = true;
                        break;
                    }
                }
            }

            if !rows.is_empty() {
                rows.sort_by(|a, b| direction.apply(compare_rows(a, b, &keys)));

                let path = self.run_path(0, self.runs.len());
                let mut writer = SpillWriter::create(path, self.capacity, &self.budget)?;
                writer.write_rows(&rows)?;
                self.runs.push_back(writer.finish()?);
            }

            if child_done {
                break;
            }
        }

        self.run_count = self.runs.len();
        tracing::debug!(
            instance = self.instance,
            runs = self.run_count,
            buffer_pages = self.buffer_pages,
            "sort.runs_generated"
        );
        Ok(())
    }

    fn merge_runs(&mut self) -> Result<()> {
        let fan_in = self.fan_in();

        while self.runs.len() > 1 {
            self.merge_passes += 1;
            let pass = self.merge_passes;
            let inputs = self.runs.len();
            let mut merged = VecDeque::new();

            while !self.runs.is_empty() {
                let take = fan_in.min(self.runs.len());
                let group: Vec<SpillFile> = self.runs.drain(..take).collect();
                if group.len() == 1 {
                    merged.extend(group);
                    continue;
                }
                let path = self.run_path(pass, merged.len());
                merged.push_back(self.merge_group(group, path)?);
            }

            tracing::debug!(
                instance = self.instance,
                pass,
                inputs,
                outputs = merged.len(),
                "sort.merge_pass"
            );
            self.runs = merged;
        }
        Ok(())
    }

    fn merge_group(&self, mut group: Vec<SpillFile>, path: PathBuf) -> Result<SpillFile> {
        let _reservation = self
            .budget
            .reserve((group.len() + 1).min(self.buffer_pages))?;

        let mut sources = Vec::with_capacity(group.len());
        let mut heap = BinaryHeap::with_capacity(group.len());
        for (source, run) in group.iter().enumerate() {
            let mut cursor = RunCursor {
                reader: run.open_reader(&self.budget)?,
                rows: Vec::new().into_iter(),
                capacity: self.capacity,
            };
            if let Some(row) = cursor.next_row()? {
                heap.push(self.entry(row, source));
            }
            sources.push(cursor);
        }

        let mut writer = SpillWriter::create(path, self.capacity, &self.budget)?;
        while let Some(entry) = heap.pop() {
            writer.push_row(&entry.row)?;
            if let Some(row) = sources[entry.source].next_row()? {
                heap.push(self.entry(row, entry.source));
            }
        }
        let output = writer.finish()?;

        drop(sources);
        for run in group.iter_mut() {
            run.remove()?;
        }
        Ok(output)
    }

    fn entry(&self, row: Row, source: usize) -> MergeEntry {
        let key = self
            .keys
            .iter()
            .map(|&k| row.get(k).cloned().unwrap_or(Value::Null))
            .collect();
        MergeEntry {
            key,
            row,
            source,
            direction: self.direction,
        }
    }

    fn release(&mut self) -> Result<()> {
        self.output = None;
        let mut first_err = None;
        if let Some(mut run) = self.final_run.take() {
            if let Err(e) = run.remove() {
                first_err.get_or_insert(e);
            }
        }
        for mut run in self.runs.drain(..) {
            if let Err(e) = run.remove() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E: Executor> Executor for ExternalSort<E> {
    fn open(&mut self) -> Result<()> {
        if self.opened {
            self.close()?;
        }
        check_budget(OPERATOR, self.buffer_pages, MIN_SORT_BUFFER_PAGES)?;
        validate_columns(OPERATOR, self.child.schema(), &self.keys)?;
        self.capacity = self.ctx.page_capacity(self.child.schema())?;
        self.run_count = 0;
        self.merge_passes = 0;

        self.child.open()?;
        self.child_open = true;
        self.opened = true;

        self.generate_runs()
            .wrap_err("external sort failed during run generation")?;
        self.child_open = false;
        self.child.close()?;

        self.merge_runs()
            .wrap_err("external sort failed while merging runs")?;

        self.final_run = self.runs.pop_front();
        self.output = match &self.final_run {
            Some(run) => Some(run.open_reader(&self.budget)?),
            None => None,
        };
        self.exhausted = self.output.is_none();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, OPERATOR)?;
        if self.exhausted {
            return Ok(None);
        }

        let page = match self.output.as_mut() {
            Some(reader) => reader.read_page(self.capacity)?,
            None => None,
        };
        match page {
            Some(page) if !page.is_empty() => Ok(Some(page)),
            _ => {
                self.exhausted = true;
                self.output = None;
                if let Some(mut run) = self.final_run.take() {
                    run.remove()?;
                }
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        let released = self.release();
        if self.child_open {
            self.child_open = false;
            self.child.close()?;
        }
        released
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

struct RunCursor {
    reader: SpillReader,
    rows: std::vec::IntoIter<Row>,
    capacity: usize,
}

impl RunCursor {
    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.rows.next() {
                return Ok(Some(row));
            }
            match self.reader.read_page(self.capacity)? {
                Some(page) => self.rows = page.into_rows().into_iter(),
                None => return Ok(None),
            }
        }
    }
}

/// Heap entry: the head row of one merge input. `BinaryHeap` is a max-heap,
/// so `Ord` is inverted: the row that must be written first is the greatest.
struct MergeEntry {
    key: SmallVec<[Value<'static>; 4]>,
    row: Row,
    source: usize,
    direction: SortDirection,
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut ord = Ordering::Equal;
        for (a, b) in self.key.iter().zip(other.key.iter()) {
            ord = a.sort_cmp(b);
            if ord != Ordering::Equal {
                break;
            }
        }
        self.direction
            .apply(ord)
            .then(self.source.cmp(&other.source))
            .reverse()
    }
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::{collect_rows, exec_error, ExecError, MaterializedScan};
    use crate::types::{ColumnDef, DataType};
    use smallvec::smallvec;
    use tempfile::{tempdir, TempDir};

    fn setup(page_size: usize) -> (TempDir, ExecContext) {
        let dir = tempdir().unwrap();
        let config = ExecConfig::builder()
            .page_size(page_size)
            .spill_dir(dir.path())
            .build()
            .unwrap();
        (dir, ExecContext::new(config))
    }

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("k", DataType::Int8),
            ColumnDef::new("seq", DataType::Int8),
        ])
    }

    fn scan(ctx: &ExecContext, keys: &[i64]) -> MaterializedScan {
        let rows = keys
            .iter()
            .enumerate()
            .map(|(i, &k)| -> Row { smallvec![Value::Int(k), Value::Int(i as i64)] })
            .collect();
        MaterializedScan::new(ctx.clone(), schema(), rows)
    }

    fn sorter(
        ctx: &ExecContext,
        keys: &[i64],
        direction: SortDirection,
        buffer_pages: usize,
    ) -> ExternalSort<MaterializedScan> {
        ExternalSort::new(ctx.clone(), scan(ctx, keys), vec![0], direction, buffer_pages)
    }

    fn spill_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn sorts_across_multiple_merge_passes() {
        let (dir, ctx) = setup(64);
        let keys: Vec<i64> = (0..200).map(|i| (i * 37) % 101).collect();
        let mut sort = sorter(&ctx, &keys, SortDirection::Ascending, 3);

        let rows = collect_rows(&mut sort).unwrap();
        assert_eq!(rows.len(), 200);
        assert!(rows
            .windows(2)
            .all(|w| w[0][0].sort_cmp(&w[1][0]) != Ordering::Greater));
        assert!(sort.run_count() > 2);
        assert!(sort.merge_passes() >= 2);
        assert!(sort.budget().peak() <= 3);
        // two merge inputs plus the output run
        assert_eq!(sort.budget().peak_files(), 3);
        assert_eq!(sort.budget().open_files(), 0);
        assert_eq!(spill_files(&dir), 0);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let (_dir, ctx) = setup(64);
        let keys: Vec<i64> = (0..120).map(|i| i % 3).collect();
        let mut sort = sorter(&ctx, &keys, SortDirection::Ascending, 2);

        let rows = collect_rows(&mut sort).unwrap();
        for w in rows.windows(2) {
            if w[0][0] == w[1][0] {
                assert!(w[0][1].as_int() < w[1][1].as_int());
            }
        }
    }

    #[test]
    fn descending_order() {
        let (_dir, ctx) = setup(64);
        let mut sort = sorter(&ctx, &[3, 9, 1, 7, 5], SortDirection::Descending, 4);
        let rows = collect_rows(&mut sort).unwrap();
        let got: Vec<i64> = rows.iter().map(|r| r[0].as_int().unwrap()).collect();
        assert_eq!(got, vec![9, 7, 5, 3, 1]);
    }

    #[test]
    fn empty_input_creates_no_runs() {
        let (dir, ctx) = setup(64);
        let mut sort = sorter(&ctx, &[], SortDirection::Ascending, 3);
        sort.open().unwrap();
        assert_eq!(sort.run_count(), 0);
        assert_eq!(spill_files(&dir), 0);
        assert!(sort.next().unwrap().is_none());
        assert!(sort.next().unwrap().is_none());
        sort.close().unwrap();
    }

    #[test]
    fn budget_below_minimum_fails_open() {
        let (_dir, ctx) = setup(64);
        let mut sort = sorter(&ctx, &[1], SortDirection::Ascending, 1);
        let err = sort.open().unwrap_err();
        assert!(matches!(
            exec_error(&err),
            Some(ExecError::InvalidBudget { minimum: 2, .. })
        ));
    }

    #[test]
    fn close_mid_stream_removes_final_run() {
        let (dir, ctx) = setup(64);
        let keys: Vec<i64> = (0..50).rev().collect();
        let mut sort = sorter(&ctx, &keys, SortDirection::Ascending, 3);
        sort.open().unwrap();
        assert_eq!(spill_files(&dir), 1);
        let first = sort.next().unwrap().unwrap();
        assert_eq!(first.rows()[0][0], Value::Int(0));
        sort.close().unwrap();
        sort.close().unwrap();
        assert_eq!(spill_files(&dir), 0);
    }
}
