//! Atomic file and directory replacement.
//!
//! Files use a temp file + rename pattern. Directories (committed images) use
//! a move-aside swap: the previous directory is renamed to `<name>.replaced`,
//! the staged directory is renamed into place, and the old one is deleted.
//! If the second rename fails, the previous directory is moved back.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Write `bytes` to `path` via a synced temp file in the same directory.
///
/// Readers see either the old contents or the new, never a prefix. The file
/// ends up world-readable (0o644 on Unix).
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = parent_or_cwd(path);

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|err| err.error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }

    best_effort_sync_parent_dir(parent);
    Ok(())
}

fn parent_or_cwd(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn best_effort_sync_parent_dir(parent: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
            debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = parent;
    }
}

/// Path the previous directory is parked at during [`replace_dir`].
#[must_use]
pub fn replaced_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".replaced");
    target.with_file_name(name)
}

/// Move `staged` to `target`, replacing any existing directory there.
///
/// `staged` and `target` must live on the same filesystem. On success the old
/// directory is gone; on failure `target` is left as it was.
pub fn replace_dir(staged: &Path, target: &Path) -> io::Result<()> {
    let parked = replaced_path(target);
    if parked.exists() {
        fs::remove_dir_all(&parked)?;
    }

    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &parked)?;
    }

    if let Err(err) = fs::rename(staged, target) {
        if had_previous && let Err(restore) = fs::rename(&parked, target) {
            tracing::warn!(
                path = %target.display(),
                "Failed to restore previous directory after failed swap: {restore}"
            );
        }
        return Err(err);
    }

    if had_previous && let Err(e) = fs::remove_dir_all(&parked) {
        tracing::warn!(
            path = %parked.display(),
            "Failed to remove replaced directory: {e}"
        );
    }

    best_effort_sync_parent_dir(parent_or_cwd(target));
    Ok(())
}

/// Recover from a crash inside the [`replace_dir`] swap window.
///
/// If `target` is missing but its parked copy exists, the swap was interrupted
/// after the old directory was moved aside; move it back.
pub fn recover_replaced_dir(target: &Path) {
    let parked = replaced_path(target);
    if target.exists() || !parked.exists() {
        return;
    }
    match fs::rename(&parked, target) {
        Ok(()) => {
            tracing::warn!(
                path = %target.display(),
                "Recovered directory from interrupted replacement"
            );
        }
        Err(e) => {
            tracing::warn!(
                path = %target.display(),
                "Failed to recover replaced directory: {e}"
            );
        }
    }
}
