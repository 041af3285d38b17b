//! # Block Nested Loop Join
//!
//! Equality join of two inputs of any size using B buffer pages:
//!
//! ```text
//! B-2 pages  block of the outer (left) input
//! 1 page     current page of the materialized inner (right) input
//! 1 page     output page under construction
//! ```
//!
//! ## Algorithm
//!
//! `open()` drains the right child into a temporary file, since it may be an
//! arbitrary subplan that cannot be rescanned, then opens the left child.
//! An inner input that already lives in a spill file (a hash join partition)
//! is adopted as is through `with_spilled_inner` and never copied.
//! Each block of up to B-2 left pages is joined against a full scan of that
//! file. For every right page the join walks every (left row, right row)
//! pair of the block and emits those satisfying all conditions.
//!
//! ## Resume Point
//!
//! `BlockCursor::Scanning` records the right page being scanned plus the
//! block page, left row and right row of the next pair to test. A full output
//! page is returned mid-scan and the next call resumes at exactly that pair.
//!
//! ## Temp Files
//!
//! `{spill_dir}/bnl-{instance}-right.spill`, or the adopted inner file.
//! Either one is deleted by `close()`.

use std::sync::Arc;

use eyre::{Result, WrapErr};

use super::{
    check_budget, ensure_open, join_rows, rows_match, validate_conditions, ExecContext, Executor,
    JoinCondition, Page,
};
use crate::config::MIN_JOIN_BUFFER_PAGES;
use crate::memory::{PageBudget, PageReservation};
use crate::spill::{SpillFile, SpillReader, SpillWriter};
use crate::types::Schema;

const OPERATOR: &str = "BlockNestedLoopJoin";

enum BlockCursor {
    NeedBlock,
    Scanning {
        reader: SpillReader,
        right_page: Page,
        block_page: usize,
        left_row: usize,
        right_row: usize,
        _right_reservation: PageReservation,
    },
    Done,
}

pub struct BlockNestedLoopJoin<L: Executor, R: Executor> {
    ctx: ExecContext,
    left: L,
    right: Option<R>,
    right_schema: Schema,
    conditions: Vec<JoinCondition>,
    buffer_pages: usize,
    instance: u64,
    budget: Arc<PageBudget>,
    schema: Schema,
    capacity: usize,
    right_capacity: usize,
    right_file: Option<SpillFile>,
    block: Vec<Page>,
    block_reservation: Option<PageReservation>,
    cursor: BlockCursor,
    left_open: bool,
    right_open: bool,
    left_done: bool,
    opened: bool,
    exhausted: bool,
    blocks_joined: usize,
}

impl<L: Executor, R: Executor> BlockNestedLoopJoin<L, R> {
    pub fn new(
        ctx: ExecContext,
        left: L,
        right: R,
        conditions: Vec<JoinCondition>,
        buffer_pages: usize,
    ) -> Self {
        let right_schema = right.schema().clone();
        let mut join = Self::build(
            ctx,
            left,
            right_schema,
            conditions,
            PageBudget::new(OPERATOR, buffer_pages),
        );
        join.right = Some(right);
        join
    }

    /// Joins `left` against an inner input already written to `right_file`,
    /// taking ownership of the file. Pages are drawn from `budget`, which may
    /// belong to the operator that produced the file.
    pub fn with_spilled_inner(
        ctx: ExecContext,
        left: L,
        right_schema: Schema,
        right_file: SpillFile,
        conditions: Vec<JoinCondition>,
        budget: Arc<PageBudget>,
    ) -> Self {
        let mut join = Self::build(ctx, left, right_schema, conditions, budget);
        join.right_file = Some(right_file);
        join
    }

    fn build(
        ctx: ExecContext,
        left: L,
        right_schema: Schema,
        conditions: Vec<JoinCondition>,
        budget: Arc<PageBudget>,
    ) -> Self {
        let instance = ctx.next_instance_id();
        let schema = Schema::join(left.schema(), &right_schema);
        Self {
            ctx,
            left,
            right: None,
            right_schema,
            conditions,
            buffer_pages: budget.limit(),
            instance,
            budget,
            schema,
            capacity: 0,
            right_capacity: 0,
            right_file: None,
            block: Vec::new(),
            block_reservation: None,
            cursor: BlockCursor::NeedBlock,
            left_open: false,
            right_open: false,
            left_done: false,
            opened: false,
            exhausted: false,
            blocks_joined: 0,
        }
    }

    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    /// Left blocks loaded so far.
    pub fn blocks_joined(&self) -> usize {
        self.blocks_joined
    }

    fn block_pages(&self) -> usize {
        self.buffer_pages - 2
    }

    /// Drains the right child into `bnl-{instance}-right`. A join built over
    /// an adopted inner file has no child and keeps the file it was given.
    fn materialize_right(&mut self) -> Result<()> {
        let Some(right) = self.right.as_mut() else {
            return Ok(());
        };
        right.open()?;
        self.right_open = true;

        let path = self.ctx.spill_path("bnl", self.instance, "right");
        let mut writer = SpillWriter::create(path, self.right_capacity, &self.budget)?;
        while let Some(page) = right.next()? {
            let _page = self.budget.reserve(1)?;
            writer.write_page(&page)?;
        }
        let file = writer.finish()?;
        tracing::debug!(
            instance = self.instance,
            rows = file.row_count(),
            pages = file.page_count(),
            "bnl.right_materialized"
        );
        self.right_file = Some(file);

        self.right_open = false;
        right.close()
    }

    fn load_block(&mut self) -> Result<()> {
        self.block.clear();
        self.block_reservation = None;
        if self.left_done {
            self.cursor = BlockCursor::Done;
            return Ok(());
        }

        let mut reservation = self.budget.reserve(0)?;
        while self.block.len() < self.block_pages() {
            match self.left.next()? {
                Some(page) if page.is_empty() => continue,
                Some(page) => {
                    reservation.grow(1)?;
                    self.block.push(page);
                }
                None => {
                    self.left_done = true;
                    break;
                }
            }
        }
        if self.block.is_empty() {
            self.cursor = BlockCursor::Done;
            return Ok(());
        }
        self.block_reservation = Some(reservation);
        self.blocks_joined += 1;

        let right_reservation = self.budget.reserve(1)?;
        let mut reader = match &self.right_file {
            Some(file) => file.open_reader(&self.budget)?,
            None => {
                self.cursor = BlockCursor::Done;
                return Ok(());
            }
        };
        self.cursor = match reader.read_page(self.right_capacity)? {
            Some(right_page) if !right_page.is_empty() => BlockCursor::Scanning {
                reader,
                right_page,
                block_page: 0,
                left_row: 0,
                right_row: 0,
                _right_reservation: right_reservation,
            },
            _ => BlockCursor::Done,
        };
        Ok(())
    }
}

impl<L: Executor, R: Executor> Executor for BlockNestedLoopJoin<L, R> {
    fn open(&mut self) -> Result<()> {
        if self.opened {
            self.close()?;
        }
        check_budget(OPERATOR, self.buffer_pages, MIN_JOIN_BUFFER_PAGES)?;
        validate_conditions(
            OPERATOR,
            self.left.schema(),
            &self.right_schema,
            &self.conditions,
        )?;
        self.capacity = self.ctx.page_capacity(&self.schema)?;
        self.right_capacity = self.ctx.page_capacity(&self.right_schema)?;
        self.left_done = false;
        self.blocks_joined = 0;
        self.opened = true;

        self.materialize_right()
            .wrap_err("block nested loop join failed to materialize its inner input")?;

        self.left.open()?;
        self.left_open = true;

        let right_empty = self.right_file.as_ref().map_or(true, SpillFile::is_empty);
        self.cursor = if right_empty {
            BlockCursor::Done
        } else {
            BlockCursor::NeedBlock
        };
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
            let mut next_block = false;
            match &mut self.cursor {
                BlockCursor::NeedBlock => {
                    self.load_block()?;
                    continue;
                }
                BlockCursor::Done => {
                    self.exhausted = true;
                    self.block.clear();
                    self.block_reservation = None;
                    break;
                }
                BlockCursor::Scanning {
                    reader,
                    right_page,
                    block_page,
                    left_row,
                    right_row,
                    ..
                } => {
                    let left_page = &self.block[*block_page];
                    let l = &left_page.rows()[*left_row];
                    let r = &right_page.rows()[*right_row];
                    if rows_match(l, r, &self.conditions) {
                        out.push(join_rows(l, r));
                    }

                    *right_row += 1;
                    if *right_row < right_page.len() {
                        continue;
                    }
                    *right_row = 0;
                    *left_row += 1;
                    if *left_row < left_page.len() {
                        continue;
                    }
                    *left_row = 0;
                    *block_page += 1;
                    if *block_page < self.block.len() {
                        continue;
                    }
                    *block_page = 0;
                    match reader.read_page(self.right_capacity)? {
                        Some(page) if !page.is_empty() => *right_page = page,
                        _ => next_block = true,
                    }
                }
            }
            if next_block {
                self.cursor = BlockCursor::NeedBlock;
            }
        }

        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.cursor = BlockCursor::Done;
        self.block.clear();
        self.block_reservation = None;

        let mut result = Ok(());
        if let Some(mut file) = self.right_file.take() {
            result = file.remove();
        }
        if self.right_open {
            self.right_open = false;
            if let Some(right) = self.right.as_mut() {
                right.close()?;
            }
        }
        if self.left_open {
            self.left_open = false;
            self.left.close()?;
        }
        result
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
