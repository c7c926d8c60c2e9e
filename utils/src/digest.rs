//! Content digests of build-context inputs.

use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::copy::Excludes;
use crate::walk::{EntryKind, walk_tree};

/// Incremental SHA-256 over named inputs.
///
/// Each input contributes its label, its kind and its content, so renaming a
/// file or moving it between directories changes the digest.
#[derive(Default)]
pub struct ContextDigest {
    hasher: Sha256,
}

impl ContextDigest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, label: &str, bytes: &[u8]) {
        self.hasher.update(b"B");
        self.frame(label.as_bytes());
        self.frame(bytes);
    }

    /// Add a file or directory tree. A missing path is recorded as absent
    /// rather than failing, so the digest can be taken before inputs are
    /// validated.
    pub fn add_path(&mut self, label: &str, path: &Path, excludes: &Excludes) -> io::Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.hasher.update(b"M");
                self.frame(label.as_bytes());
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            self.hasher.update(b"D");
            self.frame(label.as_bytes());
            self.add_dir(path, excludes)
        } else {
            self.add_bytes(label, &fs::read(path)?);
            Ok(())
        }
    }

    fn add_dir(&mut self, root: &Path, excludes: &Excludes) -> io::Result<()> {
        for entry in walk_tree(root, excludes)? {
            let label = entry.relative.to_string_lossy().replace('\\', "/");
            match entry.kind {
                EntryKind::Dir => {
                    self.hasher.update(b"D");
                    self.frame(label.as_bytes());
                }
                EntryKind::Symlink => {
                    let target = fs::read_link(&entry.path)?;
                    self.hasher.update(b"L");
                    self.frame(label.as_bytes());
                    self.frame(target.to_string_lossy().as_bytes());
                }
                EntryKind::File => self.add_bytes(&label, &fs::read(&entry.path)?),
            }
        }
        Ok(())
    }

    fn frame(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    #[must_use]
    pub fn finish(self) -> String {
        let digest = self.hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2 + 7);
        out.push_str("sha256:");
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}
