//! # Sort-Merge Join
//!
//! Both inputs are sorted ascending on their condition columns by nested
//! `ExternalSort`s, each with its own budget of B pages. The join then walks
//! the two sorted streams in key order.
//!
//! ## States
//!
//! ```text
//! Sync  ──keys equal──▶ collect right group ──▶ Emit
//!   ▲                                            │
//!   └──── next left row has a different key ────┘
//! ```
//!
//! - `Sync` advances whichever side has the smaller key. A key containing
//!   NULL never joins, so such rows are skipped. The stream ends when either
//!   side runs out.
//! - On equal keys every right row with that key is collected into a
//!   `SpillableBuffer` holding up to B-3 pages in memory.
//! - `Emit` crosses each left row with that key against the whole group,
//!   re-checking every condition. `BufferCursor` is the resume point inside
//!   the group, so a full output page can be returned at any pair.
//!
//! ## Page Budget
//!
//! ```text
//! group in memory:  left page + right page + output page + (B-3) group pages
//! group spilled:    left page + output page + 1 group cursor page
//! ```
//!
//! When a group spills, the unread rest of the right look-ahead page is
//! parked in a temp file and released. The right input is read back from the
//! parked file before the sorted stream is pulled again.
//!
//! ## Temp Files
//!
//! `smj-{instance}-group.spill` and `smj-{instance}-park-{n}.spill`, on top of
//! the run files owned by the two sorts. `close()` deletes all of them.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::Result;

use super::{
    check_budget, compare_keys, ensure_open, join_rows, project_row, rows_match,
    validate_conditions, ExecContext, Executor, ExternalSort, JoinCondition, Page, Row,
    SortDirection,
};
use crate::config::MIN_JOIN_BUFFER_PAGES;
use crate::memory::{PageBudget, PageReservation};
use crate::spill::{BufferCursor, SpillFile, SpillReader, SpillWriter, SpillableBuffer};
use crate::types::Schema;

const OPERATOR: &str = "SortMergeJoin";

enum MergeState {
    Sync,
    Emit { cursor: BufferCursor },
    Done,
}

/// The current page of one sorted input plus the position of its head row.
#[derive(Default)]
struct Head {
    page: Option<Page>,
    pos: usize,
    done: bool,
    reservation: Option<PageReservation>,
}

impl Head {
    fn row(&self) -> Option<&Row> {
        self.page.as_ref().and_then(|p| p.row(self.pos))
    }

    fn has_row(&self) -> bool {
        self.page.as_ref().is_some_and(|p| self.pos < p.len())
    }

    fn release(&mut self) {
        self.page = None;
        self.pos = 0;
        self.reservation = None;
    }

    fn load(&mut self, page: Page, budget: &Arc<PageBudget>) -> Result<()> {
        self.release();
        self.reservation = Some(budget.reserve(1)?);
        self.page = Some(page);
        Ok(())
    }
}

pub struct SortMergeJoin<L: Executor, R: Executor> {
    ctx: ExecContext,
    left: ExternalSort<L>,
    right: ExternalSort<R>,
    conditions: Vec<JoinCondition>,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    key_positions: Vec<usize>,
    buffer_pages: usize,
    instance: u64,
    budget: Arc<PageBudget>,
    schema: Schema,
    capacity: usize,
    right_capacity: usize,
    left_head: Head,
    right_head: Head,
    group: Option<SpillableBuffer>,
    group_key: Row,
    parked: Option<SpillFile>,
    parked_reader: Option<SpillReader>,
    parks: usize,
    state: MergeState,
    opened: bool,
    exhausted: bool,
}

impl<L: Executor, R: Executor> SortMergeJoin<L, R> {
    pub fn new(
        ctx: ExecContext,
        left: L,
        right: R,
        conditions: Vec<JoinCondition>,
        buffer_pages: usize,
    ) -> Self {
        let left_keys: Vec<usize> = conditions.iter().map(|c| c.left).collect();
        let right_keys: Vec<usize> = conditions.iter().map(|c| c.right).collect();
        let schema = Schema::join(left.schema(), right.schema());
        let left = ExternalSort::new(
            ctx.clone(),
            left,
            left_keys.clone(),
            SortDirection::Ascending,
            buffer_pages,
        );
        let right = ExternalSort::new(
            ctx.clone(),
            right,
            right_keys.clone(),
            SortDirection::Ascending,
            buffer_pages,
        );
        let instance = ctx.next_instance_id();
        Self {
            ctx,
            left,
            right,
            key_positions: (0..conditions.len()).collect(),
            conditions,
            left_keys,
            right_keys,
            buffer_pages,
            instance,
            budget: PageBudget::new(OPERATOR, buffer_pages),
            schema,
            capacity: 0,
            right_capacity: 0,
            left_head: Head::default(),
            right_head: Head::default(),
            group: None,
            group_key: Row::new(),
            parked: None,
            parked_reader: None,
            parks: 0,
            state: MergeState::Done,
            opened: false,
            exhausted: false,
        }
    }

    /// Budget of the join itself, excluding the two nested sorts.
    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    pub fn left_sort_budget(&self) -> &Arc<PageBudget> {
        self.left.budget()
    }

    pub fn right_sort_budget(&self) -> &Arc<PageBudget> {
        self.right.budget()
    }

    /// Times the right look-ahead tail was parked on disk.
    pub fn parked_tails(&self) -> usize {
        self.parks
    }

    fn fill_left(&mut self) -> Result<bool> {
        while !self.left_head.has_row() {
            self.left_head.release();
            if self.left_head.done {
                return Ok(false);
            }
            match self.left.next()? {
                Some(page) => self.left_head.load(page, &self.budget)?,
                None => self.left_head.done = true,
            }
        }
        Ok(true)
    }

    fn fill_right(&mut self) -> Result<bool> {
        while !self.right_head.has_row() {
            self.right_head.release();
            if let Some(reader) = self.parked_reader.as_mut() {
                match reader.read_page(self.right_capacity)? {
                    Some(page) => {
                        self.right_head.load(page, &self.budget)?;
                        continue;
                    }
                    None => {
                        self.parked_reader = None;
                        if let Some(mut file) = self.parked.take() {
                            file.remove()?;
                        }
                    }
                }
            }
            if self.right_head.done {
                return Ok(false);
            }
            match self.right.next()? {
                Some(page) => self.right_head.load(page, &self.budget)?,
                None => self.right_head.done = true,
            }
        }
        Ok(true)
    }

    /// Moves the unread rows of the right look-ahead page, followed by any
    /// rows still parked from an earlier group, into a new parked file.
    fn park_right_tail(&mut self) -> Result<()> {
        let page = self.right_head.page.take();
        let pos = self.right_head.pos;

        let tail = page.as_ref().map_or(&[][..], |p| &p.rows()[pos.min(p.len())..]);
        if tail.is_empty() && self.parked_reader.is_none() {
            self.right_head.release();
            return Ok(());
        }

        let path = self
            .ctx
            .spill_path("smj", self.instance, format!("park-{}", self.parks));
        let mut writer = SpillWriter::create(path, self.right_capacity, &self.budget)?;
        writer.write_rows(tail)?;
        drop(page);
        self.right_head.release();

        if let Some(mut reader) = self.parked_reader.take() {
            let _page = self.budget.reserve(1)?;
            while let Some(page) = reader.read_page(self.right_capacity)? {
                writer.write_page(&page)?;
            }
        }
        if let Some(mut old) = self.parked.take() {
            old.remove()?;
        }

        let file = writer.finish()?;
        tracing::debug!(
            instance = self.instance,
            rows = file.row_count(),
            "smj.park_right_tail"
        );
        self.parks += 1;
        self.parked_reader = Some(file.open_reader(&self.budget)?);
        self.parked = Some(file);
        Ok(())
    }

    fn collect_group(&mut self) -> Result<()> {
        let Some(first) = self.right_head.row() else {
            return Ok(());
        };
        self.group_key = project_row(first, &self.right_keys);

        let Some(group) = self.group.as_mut() else {
            return Ok(());
        };
        group.clear()?;
        while self.fill_right()? {
            let Some(row) = self.right_head.row() else {
                break;
            };
            if compare_keys(row, &self.right_keys, &self.group_key, &self.key_positions)
                != Ordering::Equal
            {
                break;
            }
            let row = row.clone();
            if let Some(group) = self.group.as_mut() {
                group.push(row)?;
            }
            self.right_head.pos += 1;
        }

        let spilled = match self.group.as_mut() {
            Some(group) => {
                group.seal()?;
                group.is_spilled()
            }
            None => false,
        };
        if spilled {
            self.park_right_tail()?;
        }
        Ok(())
    }

    fn start_emit(&mut self) -> Result<()> {
        self.state = MergeState::Sync;
        if let Some(group) = &self.group {
            self.state = MergeState::Emit {
                cursor: group.cursor()?,
            };
        }
        Ok(())
    }

    /// Advances the sync state by one comparison. Returns true when a group
    /// is ready to emit.
    fn synchronize(&mut self) -> Result<bool> {
        if !self.fill_left()? || !self.fill_right()? {
            self.state = MergeState::Done;
            return Ok(false);
        }
        let (Some(l), Some(r)) = (self.left_head.row(), self.right_head.row()) else {
            self.state = MergeState::Done;
            return Ok(false);
        };

        if self.left_keys.iter().any(|&k| l.get(k).map_or(true, |v| v.is_null())) {
            self.left_head.pos += 1;
            return Ok(false);
        }
        if self.right_keys.iter().any(|&k| r.get(k).map_or(true, |v| v.is_null())) {
            self.right_head.pos += 1;
            return Ok(false);
        }

        match compare_keys(l, &self.left_keys, r, &self.right_keys) {
            Ordering::Less => self.left_head.pos += 1,
            Ordering::Greater => self.right_head.pos += 1,
            Ordering::Equal => {
                self.collect_group()?;
                self.start_emit()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Called once the current left row has met the whole group.
    fn finish_left_row(&mut self) -> Result<()> {
        self.state = MergeState::Sync;
        self.left_head.pos += 1;
        if self.fill_left()? {
            let same_key = self.left_head.row().is_some_and(|l| {
                compare_keys(l, &self.left_keys, &self.group_key, &self.key_positions)
                    == Ordering::Equal
            });
            if same_key {
                return self.start_emit();
            }
        }
        if let Some(group) = self.group.as_mut() {
            group.clear()?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.state = MergeState::Done;
        self.left_head = Head::default();
        self.right_head = Head::default();
        self.parked_reader = None;
        let mut first_err = None;
        if let Some(mut file) = self.parked.take() {
            if let Err(e) = file.remove() {
                first_err.get_or_insert(e);
            }
        }
        if let Some(mut group) = self.group.take() {
            if let Err(e) = group.clear() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<L: Executor, R: Executor> Executor for SortMergeJoin<L, R> {
    fn open(&mut self) -> Result<()> {
        if self.opened {
            self.close()?;
        }
        check_budget(OPERATOR, self.buffer_pages, MIN_JOIN_BUFFER_PAGES)?;
        validate_conditions(
            OPERATOR,
            self.left.schema(),
            self.right.schema(),
            &self.conditions,
        )?;
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.right_capacity = self.ctx.page_capacity(self.right.schema())?;
        self.parks = 0;
        self.opened = true;

        self.left.open()?;
        self.right.open()?;

        self.group = Some(SpillableBuffer::new(
            self.budget.clone(),
            self.ctx.spill_path("smj", self.instance, "group"),
            self.right_capacity,
            self.buffer_pages - MIN_JOIN_BUFFER_PAGES,
        ));
        self.left_head = Head::default();
        self.right_head = Head::default();
        self.state = MergeState::Sync;
        self.exhausted = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, OPERATOR)?;
        if self.exhausted {
            return Ok(None);
        }

        let _output = self.budget.reserve(1)?;
        let mut out = Page::new(self.capacity);

        while !out.is_full() {
            let mut row_done = false;
            match &mut self.state {
                MergeState::Sync => {
                    self.synchronize()?;
                }
                MergeState::Emit { cursor } => {
                    let (Some(l), Some(group)) = (self.left_head.row(), self.group.as_ref())
                    else {
                        self.state = MergeState::Sync;
                        continue;
                    };
                    match cursor.current(group) {
                        Some(r) => {
                            if rows_match(l, r, &self.conditions) {
                                out.push(join_rows(l, r));
                            }
                            cursor.advance()?;
                        }
                        None => row_done = true,
                    }
                }
                MergeState::Done => {
                    self.exhausted = true;
                    self.release()?;
                    break;
                }
            }
            if row_done {
                self.finish_left_row()?;
            }
        }

        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        let released = self.release();
        let left = self.left.close();
        let right = self.right.close();
        released.and(left).and(right)
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

    fn pairs(ctx: &ExecContext, data: &[(Option<i64>, i64)]) -> MaterializedScan {
        let schema = Schema::new(vec![
            ColumnDef::new("k", DataType::Int8),
            ColumnDef::new("v", DataType::Int8),
        ]);
        let rows = data
            .iter()
            .map(|&(k, v)| -> Row {
                smallvec![k.map_or(Value::Null, Value::Int), Value::Int(v)]
            })
            .collect();
        MaterializedScan::new(ctx.clone(), schema, rows)
    }

    fn naive(left: &[(Option<i64>, i64)], right: &[(Option<i64>, i64)]) -> Vec<(i64, i64, i64)> {
        let mut out = Vec::new();
        for &(lk, lv) in left {
            for &(rk, rv) in right {
                if let (Some(a), Some(b)) = (lk, rk) {
                    if a == b {
                        out.push((a, lv, rv));
                    }
                }
            }
        }
        out.sort();
        out
    }

    fn flatten(rows: &[Row]) -> Vec<(i64, i64, i64)> {
        let mut out: Vec<_> = rows
            .iter()
            .map(|r| {
                (
                    r[0].as_int().unwrap(),
                    r[1].as_int().unwrap(),
                    r[3].as_int().unwrap(),
                )
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn heavy_duplicates_spill_the_group_within_budget() {
        let (dir, ctx) = setup(64);
        let left: Vec<_> = (0..30).map(|i| (Some(i % 3), i)).collect();
        let right: Vec<_> = (0..45).map(|i| (Some(i % 3), 100 + i)).collect();
        let mut join = SortMergeJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            3,
        );

        let rows = collect_rows(&mut join).unwrap();
        assert_eq!(flatten(&rows), naive(&left, &right));
        assert!(join.parked_tails() > 0);
        assert!(join.budget().peak() <= 3);
        assert!(join.left_sort_budget().peak() <= 3);
        assert!(join.right_sort_budget().peak() <= 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn null_keys_never_join() {
        let (_dir, ctx) = setup(256);
        let left = vec![(None, 1), (Some(2), 2), (None, 3)];
        let right = vec![(None, 10), (Some(2), 20)];
        let mut join = SortMergeJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            4,
        );
        let rows = collect_rows(&mut join).unwrap();
        assert_eq!(flatten(&rows), vec![(2, 2, 20)]);
    }

    #[test]
    fn disjoint_keys_produce_nothing() {
        let (_dir, ctx) = setup(128);
        let left: Vec<_> = (0..20).map(|i| (Some(i * 2), i)).collect();
        let right: Vec<_> = (0..20).map(|i| (Some(i * 2 + 1), i)).collect();
        let mut join = SortMergeJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            3,
        );
        assert!(collect_rows(&mut join).unwrap().is_empty());
    }

    #[test]
    fn second_condition_is_rechecked() {
        let (_dir, ctx) = setup(256);
        let left = vec![(Some(1), 5), (Some(1), 6)];
        let right = vec![(Some(1), 6), (Some(1), 7)];
        let mut join = SortMergeJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0), JoinCondition::new(1, 1)],
            5,
        );
        let rows = collect_rows(&mut join).unwrap();
        assert_eq!(flatten(&rows), vec![(1, 6, 6)]);
    }
}
