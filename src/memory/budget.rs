//! # Page Budget Implementation
//!
//! This module implements per-operator page accounting.
//!
//! ## Design Principles
//!
//! 1. **Hard Limits**: A reservation that would exceed the limit fails immediately
//! 2. **RAII Release**: Pages return to the budget when the reservation drops
//! 3. **High-Water Mark**: `peak` records the largest concurrent holding
//! 4. **Lock-Free**: Counters are atomics so a budget can be shared through `Arc`
//!
//! ## Accounting Model
//!
//! A page is counted while an operator holds it between calls or while it
//! holds it as part of a working set: buffered input pages during run
//! generation, merge input cursors, join blocks, hash buckets, partition
//! write buffers and the output page under construction. Pages that are
//! handed to the parent by `next()` are no longer counted.
//!
//! Nested sorts own separate budgets of B pages. The fallback join inside a
//! hash join draws from the hash join's own budget instead, so the pair never
//! holds more than B pages together.
//!
//! ## Open Files
//!
//! Spill writers and readers register with the budget of the operator that
//! opened them for as long as their file handle is open. `peak_files` is the
//! high-water mark; an operator never keeps more than B handles open.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};

use crate::executor::ExecError;

#[derive(Debug)]
pub struct PageBudget {
    operator: &'static str,
    limit: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
    open_files: AtomicUsize,
    peak_files: AtomicUsize,
}

impl PageBudget {
    pub fn new(operator: &'static str, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            operator,
            limit,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            open_files: AtomicUsize::new(0),
            peak_files: AtomicUsize::new(0),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Largest number of pages held at once since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Reserves `pages` pages, failing with `ExecError::BudgetExceeded` if the
    /// limit would be crossed.
    pub fn reserve(self: &Arc<Self>, pages: usize) -> Result<PageReservation> {
        self.acquire(pages)?;
        Ok(PageReservation {
            budget: Arc::clone(self),
            pages,
        })
    }

    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::Acquire)
    }

    /// Largest number of spill file handles open at once since creation.
    pub fn peak_files(&self) -> usize {
        self.peak_files.load(Ordering::Acquire)
    }

    /// Counts one open file handle until the returned guard drops.
    pub fn track_file(self: &Arc<Self>) -> FileHandleGuard {
        let open = self.open_files.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_files.fetch_max(open, Ordering::AcqRel);
        FileHandleGuard {
            budget: Arc::clone(self),
        }
    }

    fn acquire(&self, pages: usize) -> Result<()> {
        loop {
            let current = self.in_use.load(Ordering::Acquire);
            let new_used = current + pages;
            if new_used > self.limit {
                bail!(ExecError::BudgetExceeded {
                    operator: self.operator,
                    requested: pages,
                    available: self.limit.saturating_sub(current),
                });
            }
            if self
                .in_use
                .compare_exchange_weak(current, new_used, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.peak.fetch_max(new_used, Ordering::AcqRel);
                return Ok(());
            }
        }
    }

    fn release(&self, pages: usize) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(pages))
            });
    }
}

/// Pages held against a [`PageBudget`]; released on drop.
#[derive(Debug)]
pub struct PageReservation {
    budget: Arc<PageBudget>,
    pages: usize,
}

impl PageReservation {
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn grow(&mut self, pages: usize) -> Result<()> {
        self.budget.acquire(pages)?;
        self.pages += pages;
        Ok(())
    }

    pub fn shrink(&mut self, pages: usize) {
        let pages = pages.min(self.pages);
        self.budget.release(pages);
        self.pages -= pages;
    }
}

impl Drop for PageReservation {
    fn drop(&mut self) {
        self.budget.release(self.pages);
    }
}

/// One open spill file handle, counted against a [`PageBudget`].
#[derive(Debug)]
pub struct FileHandleGuard {
    budget: Arc<PageBudget>,
}

impl Drop for FileHandleGuard {
    fn drop(&mut self) {
        let _ = self
            .budget
            .open_files
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_releases_on_drop() {
        let budget = PageBudget::new("test", 4);
        {
            let r = budget.reserve(3).unwrap();
            assert_eq!(r.pages(), 3);
            assert_eq!(budget.in_use(), 3);
        }
        assert_eq!(budget.in_use(), 0);
        assert_eq!(budget.peak(), 3);
    }

    #[test]
    fn exceeding_limit_is_typed_error() {
        let budget = PageBudget::new("sort", 3);
        let _held = budget.reserve(2).unwrap();
        let err = budget.reserve(2).unwrap_err();
        match err.downcast_ref::<ExecError>() {
            Some(ExecError::BudgetExceeded {
                operator,
                requested,
                available,
            }) => {
                assert_eq!(*operator, "sort");
                assert_eq!(*requested, 2);
                assert_eq!(*available, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn grow_and_shrink_track_peak() {
        let budget = PageBudget::new("join", 5);
        let mut r = budget.reserve(1).unwrap();
        r.grow(3).unwrap();
        r.shrink(2);
        r.grow(1).unwrap();
        assert_eq!(budget.in_use(), 3);
        assert_eq!(budget.peak(), 4);
        assert!(r.grow(3).is_err());
        assert_eq!(r.pages(), 3);
    }

    #[test]
    fn file_guards_track_peak_handles() {
        let budget = PageBudget::new("sort", 3);
        let a = budget.track_file();
        let b = budget.track_file();
        assert_eq!(budget.open_files(), 2);
        drop(a);
        let _c = budget.track_file();
        drop(b);
        assert_eq!(budget.open_files(), 1);
        assert_eq!(budget.peak_files(), 2);
        assert_eq!(budget.in_use(), 0);
    }
}
