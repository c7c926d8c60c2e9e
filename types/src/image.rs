use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::recipe::{Entrypoint, ImagePath};
use crate::runtime::RuntimeRef;
use crate::step::Step;

/// Bumped whenever the on-disk `image.json` layout changes incompatibly.
pub const IMAGE_RECORD_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

impl InstalledPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub detail: String,
}

/// Everything `kiln run` and `kiln inspect` need to know about a committed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub format: u32,
    pub name: String,
    pub runtime: RuntimeRef,
    pub workdir: ImagePath,
    pub entrypoint: Entrypoint,
    #[serde(default)]
    pub commands: BTreeMap<String, Vec<String>>,
    pub system_packages: Vec<InstalledPackage>,
    pub installer: Option<InstalledPackage>,
    pub dependencies: Vec<InstalledPackage>,
    /// Files copied from the build context, relative to the rootfs.
    pub files: Vec<String>,
    pub journal: Vec<StepRecord>,
    pub context_digest: String,
    /// RFC 3339 timestamp of the commit.
    pub created_at: String,
    pub kiln_version: String,
}

impl ImageRecord {
    /// The argv to launch: the declared entrypoint, or a named alternate.
    #[must_use]
    pub fn command(&self, name: Option<&str>) -> Option<&[String]> {
        match name {
            None => Some(self.entrypoint.command()),
            Some(name) => self
                .commands
                .get(name)
                .map(Vec::as_slice)
                .filter(|argv| !argv.is_empty()),
        }
    }

    /// Equality ignoring the commit timestamp.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.created_at.clear();
        let mut b = other.clone();
        b.created_at.clear();
        a == b
    }
}
