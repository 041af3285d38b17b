use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};

use super::ExecError;
use crate::config::{ExecConfig, SPILL_FILE_EXTENSION};
use crate::types::Schema;

/// Shared state handed to every operator of one execution: the validated
/// configuration and the generator of operator instance ids used to keep
/// temporary file names unique.
#[derive(Debug, Clone)]
pub struct ExecContext {
    config: Arc<ExecConfig>,
    instance_ids: Arc<AtomicU64>,
}

impl ExecContext {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config: Arc::new(config),
            instance_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size()
    }

    pub fn default_buffer_pages(&self) -> usize {
        self.config.default_buffer_pages()
    }

    pub fn next_instance_id(&self) -> u64 {
        self.instance_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// `{spill_dir}/{kind}-{instance}-{tag}.spill`
    pub fn spill_path(&self, kind: &str, instance: u64, tag: impl Display) -> PathBuf {
        self.config.spill_dir().join(format!(
            "{}-{}-{}.{}",
            kind, instance, tag, SPILL_FILE_EXTENSION
        ))
    }

    /// Rows of `schema` that fit on one page.
    pub fn page_capacity(&self, schema: &Schema) -> Result<usize> {
        let row_size = schema.row_size().max(1);
        let capacity = self.page_size() / row_size;
        if capacity == 0 {
            bail!(ExecError::RowTooWide {
                row_size,
                page_size: self.page_size(),
            });
        }
        Ok(capacity)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

/// Fails with `ExecError::InvalidBudget` when `pages` is below `minimum`.
pub fn check_budget(operator: &'static str, pages: usize, minimum: usize) -> Result<()> {
    if pages < minimum {
        bail!(ExecError::InvalidBudget {
            operator,
            pages,
            minimum,
        });
    }
    Ok(())
}
