//! # Spill Files
//!
//! Three types cover the life of a temporary file:
//!
//! - `SpillWriter`: appends rows, framing them into pages of `rows_per_page`
//!   rows, and finishes into a `SpillFile`.
//! - `SpillFile`: owns the path of a finished file. The file is deleted by
//!   `remove()` or, failing that, when the value drops.
//! - `SpillReader`: reads the file back page by page. A clean end of file is
//!   `Ok(None)`; a partial header, short payload or checksum mismatch is
//!   `ExecError::SpillCorrupt`.
//!
//! ## File Format
//!
//! ```text
//! SpillFile := [Frame]*
//! Frame := [SpillPageHeader: 16 bytes] [Row]{row_count}
//! Row := RowSerde encoding
//! ```
//!
//! ## Lifecycle
//!
//! A writer dropped before `finish()` removes its partial file. Files are
//! created with `create_new`, so a name collision is reported instead of
//! clobbering another operator's data.
//!
//! ## Memory
//!
//! Neither side keeps a buffer beyond the page it is framing or decoding:
//! a writer issues one header write and one payload write per page and frees
//! the payload afterwards, and a reader decodes straight into the returned
//! `Page`. Every open writer and reader holds a `FileHandleGuard` on the
//! budget of the operator that opened it.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use zerocopy::IntoBytes;

use super::headers::SpillPageHeader;
use super::row_serde::RowSerde;
use crate::config::SPILL_PAGE_HEADER_SIZE;
use crate::executor::{ExecError, Page, Row};
use crate::memory::{FileHandleGuard, PageBudget};
use crate::types::Value;

/// A finished temporary file. Deleted on `remove()` or drop.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    pages: u64,
    rows: u64,
    removed: bool,
}

impl SpillFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u64 {
        self.pages
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Opens an independent reader positioned at the first page.
    pub fn open_reader(&self, budget: &Arc<PageBudget>) -> Result<SpillReader> {
        SpillReader::open(&self.path, budget)
    }

    /// Deletes the file. Calling it again is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = ?self.path, "spill.remove");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).wrap_err_with(|| ExecError::SpillIo {
                path: self.path.clone(),
            }),
        }
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = ?self.path, error = %e, "spill.remove_on_drop_failed");
            }
        }
    }
}

/// Appends rows to a new temporary file, one framed page per `rows_per_page`
/// rows.
pub struct SpillWriter {
    out: File,
    file: SpillFile,
    rows_per_page: usize,
    payload: Vec<u8>,
    pending_rows: usize,
    _handle: FileHandleGuard,
}

impl SpillWriter {
    pub fn create(
        path: PathBuf,
        rows_per_page: usize,
        budget: &Arc<PageBudget>,
    ) -> Result<Self> {
        let handle = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| ExecError::SpillCreate { path: path.clone() })?;

        Ok(Self {
            out: handle,
            file: SpillFile {
                path,
                pages: 0,
                rows: 0,
                removed: false,
            },
            rows_per_page: rows_per_page.max(1),
            payload: Vec::new(),
            pending_rows: 0,
            _handle: budget.track_file(),
        })
    }

    pub fn row_count(&self) -> u64 {
        self.file.rows + self.pending_rows as u64
    }

    pub fn push_row(&mut self, row: &[Value<'_>]) -> Result<()> {
        RowSerde::serialize_row_into(row, &mut self.payload);
        self.pending_rows += 1;
        if self.pending_rows >= self.rows_per_page {
            self.flush_frame()?;
        }
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[Row]) -> Result<()> {
        for row in rows {
            self.push_row(row)?;
        }
        Ok(())
    }

    pub fn write_page(&mut self, page: &Page) -> Result<()> {
        self.write_rows(page.rows())
    }

    fn flush_frame(&mut self) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let header = SpillPageHeader::for_payload(self.pending_rows as u32, &self.payload);
        self.out
            .write_all(header.as_bytes())
            .and_then(|_| self.out.write_all(&self.payload))
            .wrap_err_with(|| ExecError::SpillIo {
                path: self.file.path.clone(),
            })?;

        self.file.pages += 1;
        self.file.rows += self.pending_rows as u64;
        self.pending_rows = 0;
        self.payload = Vec::new();
        Ok(())
    }

    pub fn finish(mut self) -> Result<SpillFile> {
        self.flush_frame()?;
        self.out.flush().wrap_err_with(|| ExecError::SpillIo {
            path: self.file.path.clone(),
        })?;

        let SpillWriter {
            out, file, _handle, ..
        } = self;
        drop(out);
        drop(_handle);
        tracing::debug!(
            path = ?file.path,
            pages = file.pages,
            rows = file.rows,
            "spill.finish"
        );
        Ok(file)
    }
}

/// Sequential page reader over a spill file.
pub struct SpillReader {
    path: PathBuf,
    input: File,
    _handle: FileHandleGuard,
}

impl SpillReader {
    pub fn open(path: &Path, budget: &Arc<PageBudget>) -> Result<Self> {
        let handle = File::open(path).wrap_err_with(|| ExecError::SpillCreate {
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            input: handle,
            _handle: budget.track_file(),
        })
    }

    /// Reads the next page. Pages holding more than `capacity` rows are
    /// rejected as corrupt.
    pub fn read_page(&mut self, capacity: usize) -> Result<Option<Page>> {
        let mut header_bytes = [0u8; SPILL_PAGE_HEADER_SIZE];
        let got = read_full(&mut self.input, &mut header_bytes).wrap_err_with(|| {
            ExecError::SpillIo {
                path: self.path.clone(),
            }
        })?;
        if got == 0 {
            return Ok(None);
        }
        if got < SPILL_PAGE_HEADER_SIZE {
            return Err(self.corrupt(format!("truncated page header ({} bytes)", got)));
        }

        let header = SpillPageHeader::from_bytes(&header_bytes).map_err(|e| self.corrupt(e))?;
        let row_count = header.row_count() as usize;
        if row_count > capacity {
            return Err(self.corrupt(format!(
                "page holds {} rows, capacity is {}",
                row_count, capacity
            )));
        }

        let mut payload = vec![0u8; header.data_len() as usize];
        let got = read_full(&mut self.input, &mut payload).wrap_err_with(|| {
            ExecError::SpillIo {
                path: self.path.clone(),
            }
        })?;
        if got < payload.len() {
            return Err(self.corrupt(format!(
                "truncated payload ({} of {} bytes)",
                got,
                payload.len()
            )));
        }
        header.validate(&payload).map_err(|e| self.corrupt(e))?;

        let mut rows = Vec::with_capacity(row_count);
        let mut offset = 0;
        for _ in 0..row_count {
            let row =
                RowSerde::deserialize_row(&payload, &mut offset).map_err(|e| self.corrupt(e))?;
            rows.push(row);
        }
        if offset != payload.len() {
            return Err(self.corrupt(format!(
                "{} trailing payload bytes",
                payload.len() - offset
            )));
        }

        Ok(Some(Page::from_rows(rows, capacity)))
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> eyre::Report {
        eyre!(ExecError::SpillCorrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        })
    }
}

fn read_full(input: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
