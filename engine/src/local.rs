//! Offline backend driven by a package source directory.
//!
//! ```text
//! <source>/system/index.toml          [[package]] name, version
//! <source>/system/<name>/...          overlaid onto the rootfs on install
//! <source>/packages/<name>/<ver>/...  dependency distributions
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use kiln_types::{
    ImagePath, InstalledPackage, Manifest, RelPath, Requirement, RuntimeRef, normalize_name,
};
use kiln_utils::{Excludes, atomic_write, copy_tree};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendFut, RuntimeStore};
use crate::error::BuildError;
use crate::resolver::{Candidate, PACKAGE_METADATA_FILE, PackageIndex};

/// Refreshed package lists inside the rootfs.
pub const LISTS_DIR: &str = "var/lib/kiln/lists";
/// Install location of dependencies inside the rootfs.
pub const SITE_PACKAGES_DIR: &str = "usr/local/lib/kiln/site-packages";

const INDEX_FILE: &str = "index.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemIndex {
    #[serde(default, rename = "package")]
    packages: Vec<SystemPackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemPackage {
    name: String,
    version: String,
}

impl SystemIndex {
    fn read(path: &Path) -> Result<Option<Self>, BuildError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::io(format!("failed to read {}", path.display()), e)),
        };
        toml::from_str(&text).map(Some).map_err(|e| {
            BuildError::Resolution(format!("invalid package index {}: {e}", path.display()))
        })
    }

    fn find(&self, name: &str) -> Option<&SystemPackage> {
        self.packages.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct LocalBackend {
    source: PathBuf,
    runtimes: RuntimeStore,
}

impl LocalBackend {
    pub fn new(source: impl Into<PathBuf>, runtimes: RuntimeStore) -> Self {
        Self {
            source: source.into(),
            runtimes,
        }
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    fn packages_dir(&self) -> PathBuf {
        self.source.join("packages")
    }

    fn system_dir(&self) -> PathBuf {
        self.source.join("system")
    }
}

fn install_dist(rootfs: &Path, candidate: &Candidate) -> Result<InstalledPackage, BuildError> {
    let dest = rootfs
        .join(SITE_PACKAGES_DIR)
        .join(normalize_name(&candidate.name));
    let copy = || -> io::Result<Vec<PathBuf>> {
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        let excludes = Excludes::new(&[PACKAGE_METADATA_FILE]).map_err(io::Error::other)?;
        copy_tree(&candidate.path, &dest, &excludes)
    };
    copy().map_err(|e| BuildError::io(format!("failed to install {candidate}"), e))?;
    tracing::debug!(package = %candidate, "Installed distribution");
    Ok(InstalledPackage::new(
        candidate.name.clone(),
        candidate.version.to_string(),
    ))
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn resolve_runtime<'a>(
        &'a self,
        runtime: &'a RuntimeRef,
        rootfs: &'a Path,
    ) -> BackendFut<'a, ()> {
        Box::pin(async move { self.runtimes.install(runtime, rootfs) })
    }

    fn refresh_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
        Box::pin(async move {
            let path = self.system_dir().join(INDEX_FILE);
            let index = SystemIndex::read(&path)?.ok_or_else(|| {
                BuildError::Resolution(format!("package source has no index at {}", path.display()))
            })?;
            let body = toml::to_string(&index)
                .map_err(|e| BuildError::io("failed to encode package index", io::Error::other(e)))?;
            let lists = rootfs.join(LISTS_DIR);
            fs::create_dir_all(&lists)
                .map_err(|e| BuildError::io(format!("failed to create {}", lists.display()), e))?;
            atomic_write(lists.join(INDEX_FILE), body.as_bytes())
                .map_err(|e| BuildError::io("failed to write package index", e))?;
            tracing::debug!(packages = index.packages.len(), "Package index refreshed");
            Ok(())
        })
    }

    fn install_system<'a>(
        &'a self,
        rootfs: &'a Path,
        packages: &'a [String],
    ) -> BackendFut<'a, Vec<InstalledPackage>> {
        Box::pin(async move {
            let index = SystemIndex::read(&rootfs.join(LISTS_DIR).join(INDEX_FILE))?
                .ok_or_else(|| {
                    BuildError::Resolution(
                        "package index is not available; refresh it before installing".into(),
                    )
                })?;

            let unknown: Vec<&str> = packages
                .iter()
                .filter(|name| index.find(name).is_none())
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(BuildError::Resolution(format!(
                    "unknown system package(s): {}",
                    unknown.join(", ")
                )));
            }

            let mut installed = Vec::with_capacity(packages.len());
            for name in packages {
                let Some(package) = index.find(name) else {
                    continue;
                };
                let overlay = self.system_dir().join(name);
                if overlay.is_dir() {
                    copy_tree(&overlay, rootfs, &Excludes::none()).map_err(|e| {
                        BuildError::io(format!("failed to install system package {name}"), e)
                    })?;
                }
                tracing::debug!(package = %name, version = %package.version, "System package installed");
                installed.push(InstalledPackage::new(
                    package.name.clone(),
                    package.version.clone(),
                ));
            }
            Ok(installed)
        })
    }

    fn clean_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
        Box::pin(async move {
            let lists = rootfs.join(LISTS_DIR);
            match fs::remove_dir_all(&lists) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BuildError::io(
                    format!("failed to clean {}", lists.display()),
                    e,
                )),
            }
        })
    }

    fn upgrade_installer<'a>(
        &'a self,
        rootfs: &'a Path,
        installer: &'a str,
    ) -> BackendFut<'a, Option<InstalledPackage>> {
        Box::pin(async move {
            let index = PackageIndex::scan(&self.packages_dir())?;
            let candidate = index.latest(installer).ok_or_else(|| {
                BuildError::Resolution(format!(
                    "installer '{installer}' is not in the package source"
                ))
            })?;
            install_dist(rootfs, candidate).map(Some)
        })
    }

    fn install_dependencies<'a>(
        &'a self,
        rootfs: &'a Path,
        workdir: &'a ImagePath,
        manifest: &'a RelPath,
    ) -> BackendFut<'a, Vec<InstalledPackage>> {
        Box::pin(async move {
            let path = rootfs.join(workdir.relative()).join(manifest.as_str());
            let mut requirements = Vec::new();
            let mut seen = Vec::new();
            read_manifest(&path, manifest.as_str(), &mut requirements, &mut seen)?;

            // Resolve everything before touching the rootfs.
            let index = PackageIndex::scan(&self.packages_dir())?;
            let plan = index.resolve(&requirements)?;

            let mut installed = Vec::with_capacity(plan.len());
            for candidate in plan {
                installed.push(install_dist(rootfs, candidate)?);
            }
            Ok(installed)
        })
    }
}

/// Installer options that tune where or how distributions are fetched but
/// never which ones get installed.
const TUNING_OPTIONS: [&str; 11] = [
    "--no-cache-dir",
    "-i",
    "--index-url",
    "--extra-index-url",
    "--no-index",
    "-f",
    "--find-links",
    "--trusted-host",
    "--no-binary",
    "--only-binary",
    "--prefer-binary",
];

/// Requirements of the manifest at `path`, following `-r` includes relative
/// to the including file. Any other option that changes the installed set
/// (`-c`, `-e`, ...) is a resolution error rather than being dropped.
fn read_manifest(
    path: &Path,
    label: &str,
    requirements: &mut Vec<Requirement>,
    seen: &mut Vec<PathBuf>,
) -> Result<(), BuildError> {
    if seen.iter().any(|p| p == path) {
        tracing::debug!(manifest = label, "Manifest already included");
        return Ok(());
    }
    seen.push(path.to_path_buf());

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BuildError::Resolution(format!(
                "requirements file {label} not found in the image"
            )));
        }
        Err(e) => {
            return Err(BuildError::io(format!("failed to read {}", path.display()), e));
        }
    };
    let manifest = Manifest::parse(&text)
        .map_err(|e| BuildError::Resolution(format!("invalid manifest {label}: {e}")))?;
    for requirement in manifest.requirements() {
        if let Some(marker) = requirement.marker() {
            tracing::debug!(requirement = requirement.name(), marker, "Environment marker not evaluated offline");
        }
        if !requirement.extras().is_empty() {
            tracing::debug!(requirement = requirement.name(), extras = ?requirement.extras(), "Extras not resolved offline");
        }
    }
    requirements.extend_from_slice(manifest.requirements());

    for option in manifest.options() {
        let (flag, value) = split_option(option);
        match flag {
            "-r" | "--requirement" => {
                let include = Path::new(value);
                if value.is_empty()
                    || include.is_absolute()
                    || include.components().any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(BuildError::Resolution(format!(
                        "unsupported include '{option}' in {label}"
                    )));
                }
                let base = path.parent().unwrap_or(path);
                read_manifest(&base.join(include), value, requirements, seen)?;
            }
            flag if TUNING_OPTIONS.contains(&flag) => {
                tracing::debug!(manifest = label, option = %option, "Installer option has no effect offline");
            }
            _ => {
                return Err(BuildError::Resolution(format!(
                    "option '{option}' in {label} is not supported by the local backend"
                )));
            }
        }
    }
    Ok(())
}

/// `--flag=value`, `--flag value` or `-rvalue` into flag and value.
fn split_option(line: &str) -> (&str, &str) {
    if let Some((flag, value)) = line.split_once('=')
        && flag.starts_with("--")
        && !flag.contains(char::is_whitespace)
    {
        return (flag, value.trim());
    }
    match line.split_once(char::is_whitespace) {
        Some((flag, value)) => (flag, value.trim()),
        None if !line.starts_with("--") && line.len() > 2 && line.is_char_boundary(2) => {
            line.split_at(2)
        }
        None => (line, ""),
    }
}
