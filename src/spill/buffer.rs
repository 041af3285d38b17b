//! # Spillable Row Buffer
//!
//! An append-only buffer that keeps rows in memory up to a page allowance and
//! moves everything to a temporary file once the allowance is exceeded. The
//! buffer can be re-read any number of times through a `BufferCursor`, which
//! is how the merge join replays one group of equal-key rows against every
//! matching row of the other side.
//!
//! ## Page Accounting
//!
//! While in memory, the buffer holds one reservation page per started page of
//! rows. Spilling releases all of them. A cursor over a spilled buffer
//! decodes one page at a time and reserves that page for its own lifetime.
//! An allowance of zero pages sends every row straight to disk.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{bail, Result};

use super::file::{SpillFile, SpillReader, SpillWriter};
use crate::executor::{Page, Row};
use crate::memory::{PageBudget, PageReservation};

pub struct SpillableBuffer {
    budget: Arc<PageBudget>,
    path: PathBuf,
    rows_per_page: usize,
    memory_pages: usize,
    memory: Vec<Row>,
    reservation: Option<PageReservation>,
    writer: Option<SpillWriter>,
    file: Option<SpillFile>,
    len: usize,
}

impl SpillableBuffer {
    pub fn new(
        budget: Arc<PageBudget>,
        path: PathBuf,
        rows_per_page: usize,
        memory_pages: usize,
    ) -> Self {
        Self {
            budget,
            path,
            rows_per_page: rows_per_page.max(1),
            memory_pages,
            memory: Vec::new(),
            reservation: None,
            writer: None,
            file: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.writer.is_some() || self.file.is_some()
    }

    pub fn push(&mut self, row: Row) -> Result<()> {
        if self.file.is_some() {
            bail!("push onto a sealed spillable buffer");
        }
        self.len += 1;

        if let Some(writer) = self.writer.as_mut() {
            return writer.push_row(&row);
        }

        let limit = self.memory_pages * self.rows_per_page;
        if self.memory.len() < limit {
            if self.memory.len() % self.rows_per_page == 0 {
                match self.reservation.as_mut() {
                    Some(r) => r.grow(1)?,
                    None => self.reservation = Some(self.budget.reserve(1)?),
                }
            }
            self.memory.push(row);
            return Ok(());
        }

        let mut writer = SpillWriter::create(self.path.clone(), self.rows_per_page, &self.budget)?;
        writer.write_rows(&self.memory)?;
        writer.push_row(&row)?;
        tracing::debug!(
            path = ?self.path,
            rows = self.len,
            "spillable_buffer.spill"
        );
        self.memory = Vec::new();
        self.reservation = None;
        self.writer = Some(writer);
        Ok(())
    }

    /// Finishes pending writes so the buffer can be read. Pushing after
    /// sealing a spilled buffer is an error.
    pub fn seal(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            self.file = Some(writer.finish()?);
        }
        Ok(())
    }

    /// Starts a read from the first row. The buffer must be sealed.
    pub fn cursor(&self) -> Result<BufferCursor> {
        if self.writer.is_some() {
            bail!("cursor requested on an unsealed spillable buffer");
        }
        match &self.file {
            None => Ok(BufferCursor::Memory { pos: 0 }),
            Some(file) => {
                let reservation = self.budget.reserve(1)?;
                let mut reader = file.open_reader(&self.budget)?;
                let page = reader.read_page(self.rows_per_page)?;
                Ok(BufferCursor::Disk {
                    reader,
                    page,
                    pos: 0,
                    capacity: self.rows_per_page,
                    _reservation: reservation,
                })
            }
        }
    }

    /// Empties the buffer and deletes its file, if any.
    pub fn clear(&mut self) -> Result<()> {
        self.memory.clear();
        self.reservation = None;
        self.writer = None;
        self.len = 0;
        if let Some(mut file) = self.file.take() {
            file.remove()?;
        }
        Ok(())
    }
}

pub enum BufferCursor {
    Memory {
        pos: usize,
    },
    Disk {
        reader: SpillReader,
        page: Option<Page>,
        pos: usize,
        capacity: usize,
        _reservation: PageReservation,
    },
}

impl BufferCursor {
    pub fn current<'a>(&'a self, buffer: &'a SpillableBuffer) -> Option<&'a Row> {
        match self {
            BufferCursor::Memory { pos } => buffer.memory.get(*pos),
            BufferCursor::Disk { page, pos, .. } => page.as_ref().and_then(|p| p.row(*pos)),
        }
    }

    pub fn advance(&mut self) -> Result<()> {
        match self {
            BufferCursor::Memory { pos } => *pos += 1,
            BufferCursor::Disk {
                reader,
                page,
                pos,
                capacity,
                ..
            } => {
                *pos += 1;
                let exhausted = page.as_ref().map_or(true, |p| *pos >= p.len());
                if exhausted && page.is_some() {
                    *page = reader.read_page(*capacity)?;
                    *pos = 0;
                }
            }
        }
        Ok(())
    }
}
