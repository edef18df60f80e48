use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempDir;

/// A hermetic scratch directory for a single test, torn down on drop unless
/// `WPP_LEAVE_TEST_LOGS=true` is set (mirrors the teacher's `SHPOOL_LEAVE_TEST_LOGS`).
pub struct Dir {
    inner: Option<TempDir>,
    path: PathBuf,
}

impl Dir {
    pub fn new(prefix: &str) -> anyhow::Result<Self> {
        let inner = tempfile::Builder::new().prefix(prefix).tempdir().context("creating tmp dir")?;
        let path = inner.path().to_path_buf();
        Ok(Dir { inner: Some(inner), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        if std::env::var("WPP_LEAVE_TEST_LOGS").unwrap_or_default() == "true" {
            if let Some(inner) = self.inner.take() {
                let _ = inner.into_path();
            }
        }
    }
}
