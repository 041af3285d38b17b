//! # Spill Storage
//!
//! Temporary on-disk storage used by every operator that outgrows its page
//! budget: sorted runs, hash partitions, the materialized inner input of the
//! block nested loop join and oversized merge-join groups.
//!
//! ## Module Structure
//!
//! - `headers`: zerocopy page header with CRC-32 payload checksum
//! - `row_serde`: compact tagged row encoding
//! - `file`: `SpillWriter` / `SpillFile` / `SpillReader`
//! - `buffer`: `SpillableBuffer`, memory first, disk past an allowance
//!
//! Every file is owned by exactly one operator instance and is deleted when
//! that operator closes or drops.

mod buffer;
mod file;
mod headers;
mod row_serde;

pub use buffer::{BufferCursor, SpillableBuffer};
pub use file::{SpillFile, SpillReader, SpillWriter};
pub use headers::{compute_checksum, SpillPageHeader};
pub use row_serde::RowSerde;
