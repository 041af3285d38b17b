//! # Execution Configuration
//!
//! Numeric defaults for the operators live in [`constants`], with their
//! interdependencies enforced through compile-time assertions. Runtime settings
//! (page size, spill directory, default budget) are assembled with
//! [`ExecConfig::builder`].
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation
//! - [`ExecConfig`] / [`ExecConfigBuilder`]: validated runtime settings

pub mod constants;
pub use constants::*;

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};

/// Validated runtime settings shared by every operator of one execution.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    page_size: usize,
    spill_dir: PathBuf,
    default_buffer_pages: usize,
}

impl ExecConfig {
    pub fn builder() -> ExecConfigBuilder {
        ExecConfigBuilder::new()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    pub fn default_buffer_pages(&self) -> usize {
        self.default_buffer_pages
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            spill_dir: std::env::temp_dir(),
            default_buffer_pages: DEFAULT_BUFFER_PAGES,
        }
    }
}

/// Builder for [`ExecConfig`].
///
/// ```ignore
/// let config = ExecConfig::builder()
///     .page_size(512)
///     .spill_dir(dir.path())
///     .default_buffer_pages(4)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct ExecConfigBuilder {
    page_size: Option<usize>,
    spill_dir: Option<PathBuf>,
    default_buffer_pages: Option<usize>,
}

impl ExecConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = Some(bytes);
        self
    }

    pub fn spill_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn default_buffer_pages(mut self, pages: usize) -> Self {
        self.default_buffer_pages = Some(pages);
        self
    }

    pub fn build(self) -> Result<ExecConfig> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        ensure!(
            page_size >= MIN_PAGE_SIZE,
            "page size {} is below the minimum of {} bytes",
            page_size,
            MIN_PAGE_SIZE
        );

        let default_buffer_pages = self.default_buffer_pages.unwrap_or(DEFAULT_BUFFER_PAGES);
        ensure!(
            default_buffer_pages >= MIN_SORT_BUFFER_PAGES.max(MIN_JOIN_BUFFER_PAGES),
            "default buffer budget of {} pages is below the operator minimum",
            default_buffer_pages
        );

        let spill_dir = self.spill_dir.unwrap_or_else(std::env::temp_dir);
        ensure!(
            spill_dir.is_dir(),
            "spill directory {:?} does not exist or is not a directory",
            spill_dir
        );

        Ok(ExecConfig {
            page_size,
            spill_dir,
            default_buffer_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = ExecConfig::builder().build().unwrap();
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(config.default_buffer_pages(), DEFAULT_BUFFER_PAGES);
    }

    #[test]
    fn builder_rejects_tiny_pages() {
        let err = ExecConfig::builder().page_size(8).build().unwrap_err();
        assert!(err.to_string().contains("page size"));
    }

    #[test]
    fn builder_rejects_budget_below_minimum() {
        assert!(ExecConfig::builder().default_buffer_pages(2).build().is_err());
    }

    #[test]
    fn builder_rejects_missing_spill_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(ExecConfig::builder().spill_dir(missing).build().is_err());
    }
}
