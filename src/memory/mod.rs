//! # Page Budget Management
//!
//! Every operator is handed a budget of B pages. This module tracks how many
//! of them an operator holds and records the high-water mark so tests can
//! verify the cap.
//!
//! ```text
//! +------------------------------------------+
//! |           PageBudget (limit = B)          |
//! +------------------------------------------+
//! |  in_use ──> current held pages            |
//! |  peak   ──> max(in_use) since creation    |
//! |                                           |
//! |  reserve(n) ──> PageReservation (RAII)    |
//! |     grow / shrink adjust the holding      |
//! |     drop returns the pages                |
//! |                                           |
//! |  track_file() ──> FileHandleGuard (RAII)  |
//! |     counts open spill handles, peak_files |
//! +------------------------------------------+
//! ```

mod budget;

pub use budget::{FileHandleGuard, PageBudget, PageReservation};
