//! Deterministic directory walks over build-context and store trees.

use std::io;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use crate::copy::Excludes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// One entry below a walk root.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: PathBuf,
    /// Path relative to the walk root.
    pub relative: PathBuf,
    pub kind: EntryKind,
}

impl TreeEntry {
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Every entry below `root` in sorted, depth-first order, parents before
/// children. Excluded entries are pruned together with their subtrees.
/// Symlinks are reported, never followed. No ignore files are consulted.
pub fn walk_tree(root: &Path, excludes: &Excludes) -> io::Result<Vec<TreeEntry>> {
    walk(root, excludes, None)
}

/// Direct children of `dir`, sorted by name.
pub fn list_dir(dir: &Path) -> io::Result<Vec<TreeEntry>> {
    walk(dir, &Excludes::none(), Some(1))
}

fn walk(root: &Path, excludes: &Excludes, max_depth: Option<usize>) -> io::Result<Vec<TreeEntry>> {
    let filter_root = root.to_path_buf();
    let filter_excludes = excludes.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let Ok(relative) = entry.path().strip_prefix(&filter_root) else {
                return true;
            };
            if relative.as_os_str().is_empty() || !filter_excludes.is_excluded(relative) {
                return true;
            }
            debug!(path = %relative.display(), "Excluded from walk");
            false
        })
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(into_io)?;
        if entry.depth() == 0 {
            continue;
        }
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let path = entry.into_path();
        let relative = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        entries.push(TreeEntry {
            path,
            relative,
            kind,
        });
    }
    Ok(entries)
}

fn into_io(err: ignore::Error) -> io::Error {
    let message = err.to_string();
    err.into_io_error()
        .unwrap_or_else(|| io::Error::other(message))
}
