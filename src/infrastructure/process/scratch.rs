//! Scoped temporary configuration directories.
//!
//! Some agents read their configuration from a directory under `$HOME`. Tests
//! give each invocation a private copy of that directory so concurrent runs do
//! not share history, caches or credentials refresh state. Sensitive or bulky
//! subtrees are pruned from the copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::domain::errors::{HarnessError, HarnessResult};

/// A temporary directory removed when the owning scope ends.
///
/// Removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct ScopedConfigDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScopedConfigDir {
    /// Create an empty scoped directory.
    pub fn empty(prefix: &str) -> HarnessResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| HarnessError::io(std::env::temp_dir(), e))?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Mirror `source` into a new scoped directory, skipping top-level entries
    /// named in `prune`. A missing source yields an empty directory.
    pub fn mirror(prefix: &str, source: &Path, prune: &[&str]) -> HarnessResult<Self> {
        let scoped = Self::empty(prefix)?;
        if source.is_dir() {
            copy_tree(source, &scoped.path, prune)
                .map_err(|e| HarnessError::io(source.to_path_buf(), e))?;
            debug!(source = %source.display(), target = %scoped.path.display(), "mirrored config dir");
        }
        Ok(scoped)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file relative to the scoped directory.
    pub fn write_file(&self, relative: &str, contents: &str) -> HarnessResult<PathBuf> {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent.to_path_buf(), e))?;
        }
        fs::write(&target, contents).map_err(|e| HarnessError::io(target.clone(), e))?;
        Ok(target)
    }

    /// Remove the directory now. Equivalent to dropping, but explicit.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "failed to remove scoped config dir");
            }
        }
    }
}

impl Drop for ScopedConfigDir {
    fn drop(&mut self) {
        self.remove();
    }
}

fn copy_tree(source: &Path, target: &Path, prune: &[&str]) -> io::Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if prune.iter().any(|p| name.to_str() == Some(*p)) {
            continue;
        }
        let file_type = entry.file_type()?;
        let destination = target.join(&name);
        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
            copy_tree(&entry.path(), &destination, &[])?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &destination)?;
        }
        // symlinks and sockets are skipped
    }
    Ok(())
}
