//! Committed images on disk: `<store>/images/<name>/{rootfs/, image.json}`.
//!
//! Builds happen in a `.staging-*` directory next to the images. Dropping the
//! [`Staging`] handle deletes it, so a failed or cancelled build leaves
//! nothing behind; [`ImageStore::commit`] swaps it into place in one rename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_types::{IMAGE_RECORD_FORMAT, ImageRecord, validate_image_name};
use kiln_utils::{atomic_write, recover_replaced_dir, replace_dir};
use tempfile::TempDir;

use crate::error::StoreError;

pub const IMAGE_RECORD_FILE: &str = "image.json";
pub const ROOTFS_DIR: &str = "rootfs";
const STAGING_PREFIX: &str = ".staging-";

/// An in-progress image. Removed from disk on drop unless committed.
#[derive(Debug)]
pub struct Staging {
    name: String,
    dir: TempDir,
}

impl Staging {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn rootfs(&self) -> PathBuf {
        self.dir.path().join(ROOTFS_DIR)
    }
}

/// A committed image.
#[derive(Debug, Clone)]
pub struct Image {
    pub dir: PathBuf,
    pub record: ImageRecord,
}

impl Image {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    #[must_use]
    pub fn rootfs(&self) -> PathBuf {
        self.dir.join(ROOTFS_DIR)
    }

    /// Host path of the image workdir.
    #[must_use]
    pub fn workdir(&self) -> PathBuf {
        self.rootfs().join(self.record.workdir.relative())
    }
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn image_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_image_name(name).map_err(|_| StoreError::InvalidName(name.to_string()))?;
        Ok(self.root.join(name))
    }

    /// Create a fresh staging directory with an empty `rootfs/`.
    pub fn stage(&self, name: &str) -> Result<Staging, StoreError> {
        let target = self.image_dir(name)?;
        fs::create_dir_all(&self.root).map_err(|e| {
            StoreError::io(format!("failed to create {}", self.root.display()), e)
        })?;
        recover_replaced_dir(&target);

        let dir = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{name}-"))
            .tempdir_in(&self.root)
            .map_err(|e| StoreError::io("failed to create staging directory", e))?;
        fs::create_dir(dir.path().join(ROOTFS_DIR))
            .map_err(|e| StoreError::io("failed to create staging rootfs", e))?;
        tracing::debug!(image = name, staging = %dir.path().display(), "Staging created");
        Ok(Staging {
            name: name.to_string(),
            dir,
        })
    }

    /// Write the record into the staging directory and swap it into place.
    ///
    /// A previously committed image of the same name is replaced only once the
    /// new one is complete; if the swap fails it is left untouched.
    pub fn commit(&self, staging: Staging, record: &ImageRecord) -> Result<Image, StoreError> {
        let target = self.image_dir(&staging.name)?;
        let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Corrupt {
            name: staging.name.clone(),
            message: e.to_string(),
        })?;
        atomic_write(staging.path().join(IMAGE_RECORD_FILE), &json)
            .map_err(|e| StoreError::io("failed to write image record", e))?;

        replace_dir(staging.path(), &target).map_err(|e| {
            StoreError::io(format!("failed to commit image '{}'", staging.name), e)
        })?;
        // The staging path no longer exists; dropping the handle is a no-op.
        drop(staging);

        tracing::info!(image = %record.name, path = %target.display(), "Image committed");
        Ok(Image {
            dir: target,
            record: record.clone(),
        })
    }

    pub fn open(&self, name: &str) -> Result<Image, StoreError> {
        let dir = self.image_dir(name)?;
        recover_replaced_dir(&dir);
        let path = dir.join(IMAGE_RECORD_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(StoreError::io(format!("failed to read {}", path.display()), e)),
        };
        let corrupt = |message: String| StoreError::Corrupt {
            name: name.to_string(),
            message,
        };
        let record: ImageRecord =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if record.format != IMAGE_RECORD_FORMAT {
            return Err(corrupt(format!(
                "unsupported record format {} (expected {IMAGE_RECORD_FORMAT})",
                record.format
            )));
        }
        if record.name != name {
            return Err(corrupt(format!("record names image '{}'", record.name)));
        }
        if !dir.join(ROOTFS_DIR).is_dir() {
            return Err(corrupt("rootfs is missing".to_string()));
        }
        Ok(Image { dir, record })
    }

    /// Committed images sorted by name. Unreadable images are skipped with a warning.
    pub fn list(&self) -> Result<Vec<Image>, StoreError> {
        let entries = match kiln_utils::list_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::io(
                    format!("failed to read {}", self.root.display()),
                    e,
                ));
            }
        };
        let mut images = Vec::new();
        for entry in entries {
            let Some(name) = entry.file_name().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || name.ends_with(".replaced") || !entry.is_dir() {
                continue;
            }
            match self.open(&name) {
                Ok(image) => images.push(image),
                Err(e) => tracing::warn!(image = %name, "Skipping unreadable image: {e}"),
            }
        }
        Ok(images)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.image_dir(name)?;
        if !dir.join(IMAGE_RECORD_FILE).exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("failed to remove image '{name}'"), e))?;
        tracing::info!(image = name, "Image removed");
        Ok(())
    }

    /// Leftover `.staging-*` directories (only present after a crash).
    pub fn staging_dirs(&self) -> Vec<PathBuf> {
        kiln_utils::list_dir(&self.root)
            .map(|entries| {
                entries
                    .into_iter()
                    .filter(|e| e.file_name().is_some_and(|n| n.starts_with(STAGING_PREFIX)))
                    .map(|e| e.path)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use kiln_types::{IMAGE_RECORD_FORMAT, ImageRecord, Recipe};

    use super::{IMAGE_RECORD_FILE, ImageStore};
    use crate::error::StoreError;

    fn record(name: &str) -> ImageRecord {
        let recipe = Recipe::default();
        ImageRecord {
            format: IMAGE_RECORD_FORMAT,
            name: name.to_string(),
            runtime: recipe.runtime().clone(),
            workdir: recipe.workdir().clone(),
            entrypoint: recipe.entrypoint().clone(),
            commands: BTreeMap::new(),
            system_packages: Vec::new(),
            installer: None,
            dependencies: Vec::new(),
            files: Vec::new(),
            journal: Vec::new(),
            context_digest: "sha256:00".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            kiln_version: "0.0.0".into(),
        }
    }

    #[test]
    fn dropped_staging_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images"));
        let staging = store.stage("bot").unwrap();
        fs::write(staging.rootfs().join("partial"), "x").unwrap();
        drop(staging);
        assert!(store.staging_dirs().is_empty());
        assert!(matches!(store.open("bot"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn commit_replaces_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images"));

        let first = store.stage("bot").unwrap();
        fs::write(first.rootfs().join("old"), "1").unwrap();
        store.commit(first, &record("bot")).unwrap();

        let second = store.stage("bot").unwrap();
        fs::write(second.rootfs().join("new"), "2").unwrap();
        let image = store.commit(second, &record("bot")).unwrap();

        assert!(image.rootfs().join("new").is_file());
        assert!(!image.rootfs().join("old").exists());
        assert!(store.staging_dirs().is_empty());
        assert_eq!(store.open("bot").unwrap().record, record("bot"));
    }

    #[test]
    fn list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images"));
        assert!(store.list().unwrap().is_empty());

        for name in ["worker", "bot"] {
            let staging = store.stage(name).unwrap();
            store.commit(staging, &record(name)).unwrap();
        }
        let _pending = store.stage("pending").unwrap();

        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, ["bot", "worker"]);

        store.remove("bot").unwrap();
        assert!(matches!(store.remove("bot"), Err(StoreError::NotFound(_))));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_records_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images"));
        let staging = store.stage("bot").unwrap();
        store.commit(staging, &record("bot")).unwrap();
        fs::write(
            dir.path().join("images/bot").join(IMAGE_RECORD_FILE),
            "{not json",
        )
        .unwrap();
        assert!(matches!(store.open("bot"), Err(StoreError::Corrupt { .. })));
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(
            store.open("../etc"),
            Err(StoreError::InvalidName(_))
        ));
    }
}
