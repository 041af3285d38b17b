//! # Grace Hash Join
//!
//! Equality join that partitions both inputs to disk on the first join
//! condition, then joins each pair of partitions with an in-memory hash table.
//!
//! ## Partition Phase (in `open()`)
//!
//! ```text
//! input page ──hash₁(key) mod (B-1)──▶ one buffered page per partition
//!                                      └─ full page ──▶ hj-{id}-{side}-{p}.spill
//! ```
//!
//! The left input is partitioned first, then the right. Both children are
//! closed afterwards. Rows whose first join key is NULL cannot match and are
//! not written.
//!
//! ## Probe Phase (in `next()`)
//!
//! For partition p the left file is read into B-2 buckets chosen by
//! `hash₂(key) mod (B-2)`, one page each. `hash₂` is seeded independently of
//! `hash₁`, so rows sharing a partition still spread over the buckets. The
//! right file is then streamed and each row is probed against its bucket with
//! the full condition list.
//!
//! If a bucket would grow past one page, the build is abandoned and the
//! partition is joined by a `BlockNestedLoopJoin` that streams the left
//! partition file through a `SpillScan` and adopts the right partition file
//! as its inner input. The fallback join draws from this operator's budget,
//! and the hash join holds no page of its own while the fallback produces
//! output. A partially filled output page is returned before the first
//! fallback page.
//!
//! ## Page Budget
//!
//! ```text
//! partition:  (B-1) partition pages + 1 input page
//! build:      (B-2) bucket pages + 1 input page + 1 output page
//! probe:      (B-2) bucket pages + 1 right page + 1 output page
//! fallback:   the fallback join's (B-2) block + 1 inner page + 1 output page
//! ```
//!
//! Partition files are deleted as soon as their partition has been probed or
//! handed to the fallback join. `close()` deletes whatever remains.

use std::sync::Arc;

use eyre::{Result, WrapErr};

use super::{
    check_budget, ensure_open, hash_value_seeded, join_rows, rows_match, validate_conditions,
    BlockNestedLoopJoin, ExecContext, Executor, JoinCondition, Page, Row, SpillScan,
};
use crate::config::{BUCKET_HASH_SEED, MIN_JOIN_BUFFER_PAGES, PARTITION_HASH_SEED};
use crate::memory::{PageBudget, PageReservation};
use crate::spill::{SpillFile, SpillReader, SpillWriter};
use crate::types::{Schema, Value};

const OPERATOR: &str = "HashJoin";

/// The inner side is always an adopted partition file, so the right child
/// type is never instantiated.
type FallbackJoin = BlockNestedLoopJoin<SpillScan, SpillScan>;

enum ProbeState {
    NextPartition,
    Probing {
        partition: usize,
        buckets: Vec<Vec<Row>>,
        reader: SpillReader,
        right_file: SpillFile,
        right_page: Option<Page>,
        right_row: usize,
        bucket_pos: usize,
        _buckets: PageReservation,
        _right_page: PageReservation,
    },
    Fallback(Box<FallbackJoin>),
    Done,
}

pub struct HashJoin<L: Executor, R: Executor> {
    ctx: ExecContext,
    left: L,
    right: R,
    conditions: Vec<JoinCondition>,
    buffer_pages: usize,
    instance: u64,
    budget: Arc<PageBudget>,
    schema: Schema,
    capacity: usize,
    left_capacity: usize,
    right_capacity: usize,
    left_parts: Vec<Option<SpillFile>>,
    right_parts: Vec<Option<SpillFile>>,
    next_partition: usize,
    state: ProbeState,
    fallbacks: usize,
    left_open: bool,
    right_open: bool,
    opened: bool,
    exhausted: bool,
}

impl<L: Executor, R: Executor> HashJoin<L, R> {
    pub fn new(
        ctx: ExecContext,
        left: L,
        right: R,
        conditions: Vec<JoinCondition>,
        buffer_pages: usize,
    ) -> Self {
        let instance = ctx.next_instance_id();
        let schema = Schema::join(left.schema(), right.schema());
        Self {
            ctx,
            left,
            right,
            conditions,
            buffer_pages,
            instance,
            budget: PageBudget::new(OPERATOR, buffer_pages),
            schema,
            capacity: 0,
            left_capacity: 0,
            right_capacity: 0,
            left_parts: Vec::new(),
            right_parts: Vec::new(),
            next_partition: 0,
            state: ProbeState::Done,
            fallbacks: 0,
            left_open: false,
            right_open: false,
            opened: false,
            exhausted: false,
        }
    }

    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    /// Partitions that overflowed their buckets and were joined by BNL.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks
    }

    pub fn partition_count(&self) -> usize {
        self.buffer_pages.saturating_sub(1)
    }

    fn bucket_count(&self) -> usize {
        self.buffer_pages - 2
    }

    fn start_partition(&mut self, partition: usize) -> Result<()> {
        self.state = ProbeState::NextPartition;
        let left = self.left_parts.get_mut(partition).and_then(Option::take);
        let right = self.right_parts.get_mut(partition).and_then(Option::take);
        let (Some(mut left), Some(mut right)) = (left, right) else {
            return Ok(());
        };
        if left.is_empty() || right.is_empty() {
            left.remove()?;
            right.remove()?;
            return Ok(());
        }

        let key = self.conditions[0].left;
        let buckets_len = self.bucket_count();
        let mut buckets: Vec<Vec<Row>> = vec![Vec::new(); buckets_len];
        let mut reservation = self.budget.reserve(0)?;
        let mut overflow = false;
        {
            let mut reader = left.open_reader(&self.budget)?;
            let _input = self.budget.reserve(1)?;
            'build: while let Some(page) = reader.read_page(self.left_capacity)? {
                for row in page {
                    let bucket = bucket_of(row.get(key), buckets_len);
                    if buckets[bucket].len() >= self.left_capacity {
                        overflow = true;
                        break 'build;
                    }
                    if buckets[bucket].is_empty() {
                        reservation.grow(1)?;
                    }
                    buckets[bucket].push(row);
                }
            }
        }

        if overflow {
            drop(buckets);
            drop(reservation);
            self.fallbacks += 1;
            tracing::debug!(
                instance = self.instance,
                partition,
                left_rows = left.row_count(),
                right_rows = right.row_count(),
                "hash_join.fallback_to_bnl"
            );
            let outer = SpillScan::new(
                self.ctx.clone(),
                self.left.schema().clone(),
                left,
                Arc::clone(&self.budget),
            );
            let join = FallbackJoin::with_spilled_inner(
                self.ctx.clone(),
                outer,
                self.right.schema().clone(),
                right,
                self.conditions.clone(),
                Arc::clone(&self.budget),
            );
            self.state = ProbeState::Fallback(Box::new(join));
            if let ProbeState::Fallback(join) = &mut self.state {
                join.open()
                    .wrap_err_with(|| format!("fallback join for partition {} failed", partition))?;
            }
            return Ok(());
        }

        left.remove()?;
        let right_page = self.budget.reserve(1)?;
        let mut reader = right.open_reader(&self.budget)?;
        let first = reader.read_page(self.right_capacity)?;
        self.state = ProbeState::Probing {
            partition,
            buckets,
            reader,
            right_file: right,
            right_page: first,
            right_row: 0,
            bucket_pos: 0,
            _buckets: reservation,
            _right_page: right_page,
        };
        Ok(())
    }

    fn finish_partition(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ProbeState::NextPartition);
        if let ProbeState::Probing {
            reader,
            mut right_file,
            partition,
            ..
        } = state
        {
            drop(reader);
            right_file.remove()?;
            tracing::debug!(instance = self.instance, partition, "hash_join.partition_done");
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut first_err = None;
        if let ProbeState::Fallback(join) = &mut self.state {
            if let Err(e) = join.close() {
                first_err.get_or_insert(e);
            }
        }
        self.state = ProbeState::Done;
        for mut file in self
            .left_parts
            .drain(..)
            .chain(self.right_parts.drain(..))
            .flatten()
        {
            if let Err(e) = file.remove() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn bucket_of(value: Option<&Value<'_>>, buckets: usize) -> usize {
    match value {
        Some(v) => (hash_value_seeded(v, BUCKET_HASH_SEED) % buckets as u64) as usize,
        None => 0,
    }
}

/// Routes the rows of `input` to `partitions` spill files on column `key`.
#[allow(clippy::too_many_arguments)]
fn partition_input<E: Executor>(
    ctx: &ExecContext,
    budget: &Arc<PageBudget>,
    instance: u64,
    side: &str,
    input: &mut E,
    key: usize,
    partitions: usize,
    capacity: usize,
) -> Result<Vec<Option<SpillFile>>> {
    let mut writers = (0..partitions)
        .map(|p| {
            SpillWriter::create(
                ctx.spill_path("hj", instance, format!("{}-{}", side, p)),
                capacity,
                budget,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    let mut buffers: Vec<Vec<Row>> = vec![Vec::new(); partitions];
    let mut reservation = budget.reserve(0)?;

    while let Some(page) = input.next()? {
        let _input = budget.reserve(1)?;
        for row in page {
            let Some(value) = row.get(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let p = (hash_value_seeded(value, PARTITION_HASH_SEED) % partitions as u64) as usize;
            if buffers[p].is_empty() {
                reservation.grow(1)?;
            }
            buffers[p].push(row);
            if buffers[p].len() >= capacity {
                writers[p].write_rows(&buffers[p])?;
                buffers[p].clear();
                reservation.shrink(1);
            }
        }
    }

    for (writer, buffer) in writers.iter_mut().zip(buffers.iter()) {
        if !buffer.is_empty() {
            writer.write_rows(buffer)?;
        }
    }
    drop(reservation);

    let files = writers
        .into_iter()
        .map(|w| w.finish().map(Some))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        instance,
        side,
        partitions,
        rows = files.iter().flatten().map(SpillFile::row_count).sum::<u64>(),
        "hash_join.partitioned"
    );
    Ok(files)
}

impl<L: Executor, R: Executor> Executor for HashJoin<L, R> {
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
        self.left_capacity = self.ctx.page_capacity(self.left.schema())?;
        self.right_capacity = self.ctx.page_capacity(self.right.schema())?;
        self.fallbacks = 0;
        self.next_partition = 0;
        self.opened = true;
        let partitions = self.partition_count();

        self.left.open()?;
        self.left_open = true;
        self.left_parts = partition_input(
            &self.ctx,
            &self.budget,
            self.instance,
            "left",
            &mut self.left,
            self.conditions[0].left,
            partitions,
            self.left_capacity,
        )
        .wrap_err("hash join failed to partition its left input")?;
        self.left_open = false;
        self.left.close()?;

        self.right.open()?;
        self.right_open = true;
        self.right_parts = partition_input(
            &self.ctx,
            &self.budget,
            self.instance,
            "right",
            &mut self.right,
            self.conditions[0].right,
            partitions,
            self.right_capacity,
        )
        .wrap_err("hash join failed to partition its right input")?;
        self.right_open = false;
        self.right.close()?;

        self.state = ProbeState::NextPartition;
        self.exhausted = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Page>> {
        ensure_open(self.opened, OPERATOR)?;
        if self.exhausted {
            return Ok(None);
        }

        // Held for the output page, except while the fallback join runs.
        let mut output: Option<PageReservation> = None;
        let mut out = Page::new(self.capacity);
        let right_key = self.conditions[0].right;

        while !out.is_full() {
            let mut partition_done = false;
            if output.is_none() && !matches!(self.state, ProbeState::Fallback(_)) {
                output = Some(self.budget.reserve(1)?);
            }
            match &mut self.state {
                ProbeState::NextPartition => {
                    if self.next_partition >= self.left_parts.len() {
                        self.state = ProbeState::Done;
                        continue;
                    }
                    let partition = self.next_partition;
                    self.next_partition += 1;
                    self.start_partition(partition)?;
                    if matches!(self.state, ProbeState::Fallback(_)) && !out.is_empty() {
                        return Ok(out.flush());
                    }
                }
                ProbeState::Fallback(join) => {
                    // `out` is empty here: a partial page is returned before
                    // the fallback starts.
                    output = None;
                    match join.next()? {
                        Some(page) => return Ok(Some(page)),
                        None => {
                            join.close()?;
                            self.state = ProbeState::NextPartition;
                        }
                    }
                }
                ProbeState::Probing {
                    buckets,
                    reader,
                    right_page,
                    right_row,
                    bucket_pos,
                    ..
                } => {
                    let current = right_page.as_ref().map(|p| p.row(*right_row));
                    match current {
                        None => partition_done = true,
                        Some(None) => {
                            *right_page = reader.read_page(self.right_capacity)?;
                            *right_row = 0;
                            *bucket_pos = 0;
                        }
                        Some(Some(r)) => {
                            let bucket = &buckets[bucket_of(r.get(right_key), buckets.len())];
                            match bucket.get(*bucket_pos) {
                                Some(l) => {
                                    if rows_match(l, r, &self.conditions) {
                                        out.push(join_rows(l, r));
                                    }
                                    *bucket_pos += 1;
                                }
                                None => {
                                    *right_row += 1;
                                    *bucket_pos = 0;
                                }
                            }
                        }
                    }
                }
                ProbeState::Done => {
                    self.exhausted = true;
                    break;
                }
            }
            if partition_done {
                self.finish_partition()?;
            }
        }

        Ok(out.flush())
    }

    fn close(&mut self) -> Result<()> {
        self.opened = false;
        let released = self.release();
        if self.left_open {
            self.left_open = false;
            self.left.close()?;
        }
        if self.right_open {
            self.right_open = false;
            self.right.close()?;
        }
        released
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

    fn pairs(ctx: &ExecContext, data: &[(i64, i64)]) -> MaterializedScan {
        let schema = Schema::new(vec![
            ColumnDef::new("k", DataType::Int8),
            ColumnDef::new("v", DataType::Int8),
        ]);
        let rows = data
            .iter()
            .map(|&(k, v)| -> Row { smallvec![Value::Int(k), Value::Int(v)] })
            .collect();
        MaterializedScan::new(ctx.clone(), schema, rows)
    }

    fn expected(left: &[(i64, i64)], right: &[(i64, i64)]) -> Vec<(i64, i64, i64)> {
        let mut out = Vec::new();
        for &(lk, lv) in left {
            for &(rk, rv) in right {
                if lk == rk {
                    out.push((lk, lv, rv));
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
    fn spread_keys_join_without_fallback() {
        let (dir, ctx) = setup(256);
        let left: Vec<_> = (0..40).map(|i| (i, i * 10)).collect();
        let right: Vec<_> = (0..60).map(|i| (i % 50, i)).collect();
        let mut join = HashJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            8,
        );

        let rows = collect_rows(&mut join).unwrap();
        assert_eq!(flatten(&rows), expected(&left, &right));
        assert_eq!(join.fallback_count(), 0);
        assert!(join.budget().peak() <= 8);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn skewed_partition_falls_back_to_block_nested_loop() {
        let (dir, ctx) = setup(64);
        let left: Vec<_> = (0..30).map(|i| (7, i)).collect();
        let right: Vec<_> = (0..10).map(|i| (if i % 2 == 0 { 7 } else { 8 }, i)).collect();
        let mut join = HashJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            3,
        );

        join.open().unwrap();
        let mut rows = Vec::new();
        while let Some(page) = join.next().unwrap() {
            rows.extend(page);
            // the fallback reads the partition files in place
            let copies = std::fs::read_dir(dir.path())
                .unwrap()
                .filter(|e| {
                    let name = e.as_ref().unwrap().file_name();
                    name.to_string_lossy().starts_with("bnl-")
                })
                .count();
            assert_eq!(copies, 0);
        }
        join.close().unwrap();

        assert_eq!(flatten(&rows), expected(&left, &right));
        assert_eq!(join.fallback_count(), 1);
        // shared with the fallback join, so this is the peak of both together
        assert!(join.budget().peak() <= 3);
        assert!(join.budget().peak_files() <= 3);
        assert_eq!(join.budget().in_use(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn close_mid_stream_removes_partitions() {
        let (dir, ctx) = setup(64);
        let left: Vec<_> = (0..50).map(|i| (i % 5, i)).collect();
        let right: Vec<_> = (0..50).map(|i| (i % 5, i)).collect();
        let mut join = HashJoin::new(
            ctx.clone(),
            pairs(&ctx, &left),
            pairs(&ctx, &right),
            vec![JoinCondition::new(0, 0)],
            4,
        );
        join.open().unwrap();
        assert!(std::fs::read_dir(dir.path()).unwrap().count() > 0);
        assert!(join.next().unwrap().is_some());
        join.close().unwrap();
        join.close().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
