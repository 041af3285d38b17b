//! # Executor Error Classes
//!
//! Operators return `eyre::Result`. When a failure belongs to one of the
//! classes below, the operator attaches an `ExecError` as the report's context
//! (`wrap_err_with(|| ExecError::…)` or `bail!(ExecError::…)`), so callers can
//! classify it with `report.downcast_ref::<ExecError>()`.
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | `SpillCreate` | a temp file cannot be created or opened |
//! | `SpillIo` | a read or write on an open temp file fails |
//! | `SpillCorrupt` | a spill page is truncated or fails its checksum |
//! | `Unsupported` | the operator is configured with a feature it lacks |
//! | `GroupInvariant` | a non-key output column varies within a group |
//! | `NotOpen` | `next()` is called before `open()` |
//! | `InvalidBudget` | B is below the operator's minimum |
//! | `BudgetExceeded` | a page reservation would cross B |
//! | `RowTooWide` | a row does not fit on one page |
//!
//! None of these are recovered inside the operators. The parent closes the
//! tree, which deletes every temp file.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    SpillCreate {
        path: PathBuf,
    },
    SpillIo {
        path: PathBuf,
    },
    SpillCorrupt {
        path: PathBuf,
        reason: String,
    },
    Unsupported {
        operator: &'static str,
        feature: String,
    },
    GroupInvariant {
        column: usize,
    },
    NotOpen {
        operator: &'static str,
    },
    InvalidBudget {
        operator: &'static str,
        pages: usize,
        minimum: usize,
    },
    BudgetExceeded {
        operator: &'static str,
        requested: usize,
        available: usize,
    },
    RowTooWide {
        row_size: usize,
        page_size: usize,
    },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::SpillCreate { path } => {
                write!(f, "failed to create spill file {:?}", path)
            }
            ExecError::SpillIo { path } => write!(f, "I/O error on spill file {:?}", path),
            ExecError::SpillCorrupt { path, reason } => {
                write!(f, "corrupt spill file {:?}: {}", path, reason)
            }
            ExecError::Unsupported { operator, feature } => {
                write!(f, "{} does not support {}", operator, feature)
            }
            ExecError::GroupInvariant { column } => write!(
                f,
                "output column {} is neither grouped nor constant within its group",
                column
            ),
            ExecError::NotOpen { operator } => {
                write!(f, "{}: next() called before open()", operator)
            }
            ExecError::InvalidBudget {
                operator,
                pages,
                minimum,
            } => write!(
                f,
                "{} needs at least {} buffer pages, got {}",
                operator, minimum, pages
            ),
            ExecError::BudgetExceeded {
                operator,
                requested,
                available,
            } => write!(
                f,
                "page budget exceeded: {} requested {} pages but only {} available",
                operator, requested, available
            ),
            ExecError::RowTooWide {
                row_size,
                page_size,
            } => write!(
                f,
                "row of {} bytes does not fit on a {} byte page",
                row_size, page_size
            ),
        }
    }
}

impl std::error::Error for ExecError {}

/// Returns the `ExecError` attached anywhere in the report's chain.
pub fn exec_error(report: &eyre::Report) -> Option<&ExecError> {
    report.downcast_ref::<ExecError>().or_else(|| {
        report
            .chain()
            .find_map(|cause| cause.downcast_ref::<ExecError>())
    })
}
