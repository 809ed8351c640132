//! Exclude patterns for the directory walk and the live watcher.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Glob-based exclusion, matched against root-relative paths.
///
/// A pattern like `**/.git/**` or `*.part` excludes matching files; a
/// directory whose relative path matches is not descended into.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    root: PathBuf,
    excludes: GlobSet,
}

impl ScanFilter {
    pub fn new(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            root: root.into(),
            excludes: builder.build()?,
        })
    }

    /// A filter that excludes nothing.
    #[must_use]
    pub fn allow_all(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excludes: GlobSet::empty(),
        }
    }

    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.excludes.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.excludes.is_match(relative)
    }
}
