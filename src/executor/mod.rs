//! # Executor - Page-at-a-Time Volcano Model
//!
//! Every physical operator implements [`Executor`]:
//!
//! - `open()`: allocate resources, open children, run blocking phases
//!   (sort run generation, hash partitioning, inner materialization)
//! - `next()`: return one page of 1..capacity rows, or `None` at end of stream
//! - `close()`: release file handles and delete every temporary file
//!
//! ## Lifecycle
//!
//! ```text
//! Closed ──open()──> Open ──next() = None──> Exhausted ──close()──> Closed
//!                      │                                    ▲
//!                      └──────────────close()───────────────┘
//! ```
//!
//! - `next()` before `open()` is `ExecError::NotOpen`
//! - once `next()` has returned `None` it keeps returning `None`
//! - `close()` is idempotent and valid in any state; a parent that only wants
//!   a few rows may close a partially drained child
//! - dropping an operator deletes whatever temporary files it still owns
//!
//! ## Operator Tree
//!
//! ```text
//! HashJoin
//!   ├── partition files (B-1 per side)
//!   └── BlockNestedLoopJoin<SpillScan, SpillScan>   (overflow fallback)
//!
//! SortMergeJoin
//!   ├── ExternalSort(left)
//!   └── ExternalSort(right)
//!
//! Distinct / GroupBy / OrderBy
//!   └── ExternalSort
//! ```
//!
//! ## Buffer Budget
//!
//! Each operator is handed its own budget of B pages and accounts for the row
//! pages it holds through a [`PageBudget`](crate::memory::PageBudget). Nested
//! operators receive an explicit budget at construction; they never draw from
//! the parent's.
//!
//! ## Example Usage
//!
//! ```ignore
//! let mut join = HashJoin::new(ctx, left, right, vec![JoinCondition::new(0, 0)], 8);
//! join.open()?;
//! while let Some(page) = join.next()? {
//!     for row in page.rows() {
//!         process_row(row);
//!     }
//! }
//! join.close()?;
//! ```

mod block_nested;
mod context;
mod distinct;
mod error;
mod group_by;
mod hash_join;
mod order_by;
mod page;
mod project;
mod scan;
mod sort;
mod sort_merge;
mod util;

pub use block_nested::BlockNestedLoopJoin;
pub use context::{check_budget, ExecContext};
pub use distinct::Distinct;
pub use error::{exec_error, ExecError};
pub use group_by::{AggregateFunction, GroupBy, OutputColumn};
pub use hash_join::HashJoin;
pub use order_by::OrderBy;
pub use page::{Page, Row};
pub use project::ProjectExecutor;
pub use scan::{MaterializedScan, SpillScan};
pub use sort::ExternalSort;
pub use sort_merge::SortMergeJoin;
pub use util::{
    compare_keys, compare_rows, hash_value_seeded, join_rows, project_row, rows_match,
    validate_columns, validate_conditions, JoinCondition, SortDirection,
};

use eyre::Result;

use crate::types::Schema;

pub trait Executor {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Page>>;
    fn close(&mut self) -> Result<()>;
    fn schema(&self) -> &Schema;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn next(&mut self) -> Result<Option<Page>> {
        (**self).next()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn schema(&self) -> &Schema {
        (**self).schema()
    }
}

/// Opens `exec`, drains every page and closes it. The operator is closed even
/// when opening or draining fails.
pub fn collect_rows<E: Executor + ?Sized>(exec: &mut E) -> Result<Vec<Row>> {
    if let Err(e) = exec.open() {
        let _ = exec.close();
        return Err(e);
    }
    let mut rows = Vec::new();
    let drained = (|| -> Result<()> {
        while let Some(page) = exec.next()? {
            rows.extend(page);
        }
        Ok(())
    })();
    let closed = exec.close();
    drained?;
    closed?;
    Ok(rows)
}

fn ensure_open(opened: bool, operator: &'static str) -> Result<()> {
    if !opened {
        eyre::bail!(ExecError::NotOpen { operator });
    }
    Ok(())
}
