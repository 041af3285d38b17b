//! # spillway - Buffer-Bounded Relational Operators
//!
//! spillway is the physical execution layer of a relational engine: sort,
//! duplicate elimination, grouping and equality joins over inputs of any
//! size, each running inside a fixed budget of B buffer pages and spilling to
//! temporary files when the data does not fit.
//!
//! ## Quick Start
//!
//! ```ignore
//! use spillway::config::ExecConfig;
//! use spillway::executor::{ExecContext, Executor, HashJoin, JoinCondition};
//!
//! let config = ExecConfig::builder()
//!     .page_size(4096)
//!     .spill_dir("/tmp/spill")
//!     .build()?;
//! let ctx = ExecContext::new(config);
//!
//! let mut join = HashJoin::new(ctx, orders, customers, vec![JoinCondition::new(1, 0)], 16);
//! join.open()?;
//! while let Some(page) = join.next()? {
//!     emit(page);
//! }
//! join.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  executor: Sort, Distinct, GroupBy, OrderBy,    │
//! │            BNL / Sort-Merge / Hash joins        │
//! ├─────────────────────────────────────────────────┤
//! │  memory: page and file handle accounting        │
//! ├─────────────────────────────────────────────────┤
//! │  spill: row codec, framed pages, temp files     │
//! ├─────────────────────────────────────────────────┤
//! │  types: Value, DataType, Schema                 │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! Operators follow the open/next/close iterator protocol and exchange whole
//! pages of rows. Execution is single-threaded and pull-based. Every operator
//! owns the temporary files it creates and deletes them on `close()`, whether
//! or not its output was fully consumed.
//!
//! ## Module Overview
//!
//! - [`config`]: page size, spill directory, default budget, constants
//! - [`executor`]: the operator protocol and every physical operator
//! - [`memory`]: per-operator page budgets
//! - [`spill`]: temporary run and partition files
//! - [`types`]: values and schemas

#[macro_use]
mod macros;

pub mod config;
pub mod executor;
pub mod memory;
pub mod spill;
pub mod types;

pub use config::{ExecConfig, ExecConfigBuilder};
pub use executor::{
    collect_rows, BlockNestedLoopJoin, Distinct, ExecContext, ExecError, Executor, ExternalSort,
    GroupBy, HashJoin, JoinCondition, OrderBy, Page, Row, SortDirection, SortMergeJoin,
};
pub use types::{ColumnDef, DataType, Schema, Value};
