//! # Execution Configuration Constants
//!
//! This module centralizes the numeric defaults used by the operators, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> page capacity = DEFAULT_PAGE_SIZE / Schema::row_size()
//!       │     A row wider than the page yields capacity 0 and the
//!       │     operator refuses to open.
//!       │
//!       └─> MIN_PAGE_SIZE (must be <=)
//!
//! DEFAULT_BUFFER_PAGES (B = 16)
//!       │
//!       ├─> MIN_SORT_BUFFER_PAGES (2, must be <=)
//!       │     Run merge fan-in is max(B-1, 2). At B = 2 both pages hold
//!       │     merge inputs and merged rows stream straight into the run
//!       │     writer's frame buffer.
//!       │
//!       └─> MIN_JOIN_BUFFER_PAGES (3, must be <=)
//!             Block nested loop holds B-2 left pages + 1 right + 1 output.
//!             Hash join routes into B-1 partitions and builds B-2 buckets.
//! ```
//!
//! ## Modifying Constants
//!
//! The compile-time assertions at the bottom of this file encode the arrows
//! above. Spill framing constants are part of the on-disk page layout and must
//! stay in sync with `spill::headers::SpillPageHeader`.

// ============================================================================
// PAGE CONFIGURATION
// ============================================================================

/// Default byte size of one page. Every operator sizes its pages as
/// `page_size / row_size` rows.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted by `ExecConfigBuilder::build`.
pub const MIN_PAGE_SIZE: usize = 64;

/// Width charged for a variable-length column (TEXT, BLOB, unbounded VARCHAR)
/// when computing the row size. Bounded VARCHAR(n)/CHAR(n) use `n` instead.
pub const DEFAULT_VARLEN_WIDTH: usize = 32;

// ============================================================================
// BUFFER BUDGET CONFIGURATION
// ============================================================================

/// Default number of buffer pages (B) handed to operators by callers that do
/// not choose one explicitly.
pub const DEFAULT_BUFFER_PAGES: usize = 16;

/// Minimum budget for external sort. Fan-in of the merge phase is
/// `max(B-1, MIN_MERGE_FAN_IN)`.
pub const MIN_SORT_BUFFER_PAGES: usize = 2;

/// Smallest merge fan-in that still reduces the number of runs per pass.
pub const MIN_MERGE_FAN_IN: usize = 2;

/// Minimum budget for every join strategy.
pub const MIN_JOIN_BUFFER_PAGES: usize = 3;

// ============================================================================
// SPILL FILE CONFIGURATION
// ============================================================================

/// Magic number stamped into every spill page header ("SPLP").
pub const SPILL_PAGE_MAGIC: u32 = 0x504C_5053;

/// Size of the on-disk page header preceding each page payload.
pub const SPILL_PAGE_HEADER_SIZE: usize = 16;

/// Extension given to every temporary file created by the operators.
pub const SPILL_FILE_EXTENSION: &str = "spill";

// ============================================================================
// HASH SEEDS
// Partition routing and bucket building must use independent hash functions,
// otherwise every row of a partition lands in the same bucket.
// ============================================================================

/// Seed of the partitioning hash used by hash join's first phase.
pub const PARTITION_HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seed of the in-memory bucket hash used by hash join's probe phase.
pub const BUCKET_HASH_SEED: u64 = 0xC2B2_AE3D_27D4_EB4F;

// ============================================================================
// COMPILE-TIME ASSERTIONS
// ============================================================================

const _: () = assert!(
    MIN_PAGE_SIZE <= DEFAULT_PAGE_SIZE,
    "DEFAULT_PAGE_SIZE must not be below MIN_PAGE_SIZE"
);

const _: () = assert!(
    MIN_SORT_BUFFER_PAGES <= DEFAULT_BUFFER_PAGES,
    "default budget must satisfy the sort minimum"
);

const _: () = assert!(
    MIN_MERGE_FAN_IN <= MIN_SORT_BUFFER_PAGES,
    "a minimal sort budget must be able to hold every merge input page"
);

const _: () = assert!(
    MIN_JOIN_BUFFER_PAGES <= DEFAULT_BUFFER_PAGES,
    "default budget must satisfy the join minimum"
);

const _: () = assert!(
    PARTITION_HASH_SEED != BUCKET_HASH_SEED,
    "partition and bucket hashes must be independent"
);
