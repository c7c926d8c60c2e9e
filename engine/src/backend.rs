//! The seam between the pipeline and whatever actually installs packages.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use kiln_types::{ImagePath, InstalledPackage, RelPath, RuntimeRef};
use kiln_utils::{Excludes, copy_tree};

use crate::error::BuildError;

/// Backend future type alias.
pub type BackendFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, BuildError>> + Send + 'a>>;

/// Package operations the bootstrap steps delegate to.
///
/// Every method works on the staging rootfs only; a backend never touches a
/// committed image.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Populate `rootfs` with the pinned base runtime.
    fn resolve_runtime<'a>(&'a self, runtime: &'a RuntimeRef, rootfs: &'a Path)
    -> BackendFut<'a, ()>;

    fn refresh_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()>;

    fn install_system<'a>(
        &'a self,
        rootfs: &'a Path,
        packages: &'a [String],
    ) -> BackendFut<'a, Vec<InstalledPackage>>;

    /// Discard the package index cache. Nothing depends on this for correctness.
    fn clean_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()>;

    /// Upgrade the dependency installer. `None` when the version is unknown.
    fn upgrade_installer<'a>(
        &'a self,
        rootfs: &'a Path,
        installer: &'a str,
    ) -> BackendFut<'a, Option<InstalledPackage>>;

    /// Install the requirements of `<workdir>/<manifest>` without any cache.
    fn install_dependencies<'a>(
        &'a self,
        rootfs: &'a Path,
        workdir: &'a ImagePath,
        manifest: &'a RelPath,
    ) -> BackendFut<'a, Vec<InstalledPackage>>;
}

/// Runtime store: base rootfs trees at `<dir>/<id>/<tag>/`.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    dir: PathBuf,
}

impl RuntimeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_of(&self, runtime: &RuntimeRef) -> PathBuf {
        self.dir.join(runtime.id()).join(runtime.tag())
    }

    /// Copy the runtime tree into `rootfs`. An unknown id or tag is a
    /// resolution error listing the tags that do exist.
    pub fn install(&self, runtime: &RuntimeRef, rootfs: &Path) -> Result<(), BuildError> {
        let src = self.path_of(runtime);
        if !src.is_dir() {
            let available = available_tags(&self.dir.join(runtime.id()));
            let hint = if available.is_empty() {
                String::new()
            } else {
                format!(" (available: {})", available.join(", "))
            };
            return Err(BuildError::Resolution(format!(
                "runtime {runtime} not found in {}{hint}",
                self.dir.display()
            )));
        }
        let copied = copy_tree(&src, rootfs, &Excludes::none())
            .map_err(|e| BuildError::io(format!("failed to copy runtime {runtime}"), e))?;
        tracing::debug!(%runtime, files = copied.len(), "Runtime copied");
        Ok(())
    }
}

fn available_tags(dir: &Path) -> Vec<String> {
    let Ok(entries) = kiln_utils::list_dir(dir) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|e| e.is_dir())
        .filter_map(|e| e.file_name().map(str::to_string))
        .collect()
}
