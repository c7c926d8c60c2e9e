//! Copying build-context inputs into an image rootfs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::walk::{EntryKind, walk_tree};

/// Exclude patterns for tree copies.
///
/// A pattern matches either the path relative to the copy root
/// (`tests/fixtures/*.bin`) or any single component of it (`__pycache__`,
/// `*.pyc`), so bare names behave like `.dockerignore` entries.
#[derive(Debug, Clone)]
pub struct Excludes {
    set: GlobSet,
    empty: bool,
}

impl Excludes {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern.as_ref())?);
        }
        Ok(Self {
            set: builder.build()?,
            empty: patterns.is_empty(),
        })
    }

    #[must_use]
    pub fn none() -> Self {
        Self {
            set: GlobSet::empty(),
            empty: true,
        }
    }

    #[must_use]
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.empty {
            return false;
        }
        if self.set.is_match(relative) {
            return true;
        }
        relative
            .components()
            .any(|c| self.set.is_match(Path::new(c.as_os_str())))
    }
}

/// Copy a single file, creating parent directories. Permissions are preserved.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    debug!(src = %src.display(), dst = %dst.display(), "Copied file");
    Ok(())
}

/// Recursively copy `src` into `dst`, returning the copied files relative to `dst`.
///
/// Entries are visited in sorted order so the returned list (and therefore any
/// record built from it) is deterministic. Symlinks are recreated as links on
/// Unix rather than followed.
pub fn copy_tree(src: &Path, dst: &Path, excludes: &Excludes) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dst)?;
    let mut copied = Vec::new();
    for entry in walk_tree(src, excludes)? {
        let target = dst.join(&entry.relative);
        match entry.kind {
            EntryKind::Dir => fs::create_dir_all(&target)?,
            EntryKind::Symlink => {
                copy_symlink(&entry.path, &target)?;
                copied.push(entry.relative);
            }
            EntryKind::File => {
                fs::copy(&entry.path, &target)?;
                copied.push(entry.relative);
            }
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}
