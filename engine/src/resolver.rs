//! Dependency resolution against an offline package directory.
//!
//! Layout: `<dir>/<name>/<version>/` holds one distribution; an optional
//! `kiln-package.toml` inside it lists `requires = [...]` in manifest syntax.
//! The resolver picks the highest version satisfying every constraint on a
//! name, follows `requires` transitively and fails on the first name no
//! version can satisfy.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_types::{Requirement, Version, normalize_name};
use serde::Deserialize;

use crate::error::BuildError;

pub const PACKAGE_METADATA_FILE: &str = "kiln-package.toml";

/// Resolution rounds before giving up on a `requires` graph that never settles.
const MAX_ROUNDS: usize = 64;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageMetadata {
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    /// Directory name, as published.
    pub name: String,
    pub version: Version,
    pub path: PathBuf,
    pub requires: Vec<Requirement>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Every distribution in a package directory, keyed by normalized name.
#[derive(Debug, Default)]
pub struct PackageIndex {
    packages: BTreeMap<String, Vec<Candidate>>,
}

impl PackageIndex {
    /// Scan `dir`. A missing directory is an empty index.
    pub fn scan(dir: &Path) -> Result<Self, BuildError> {
        let mut index = Self::default();
        let entries = match kiln_utils::list_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(index),
            Err(e) => {
                return Err(BuildError::io(
                    format!("failed to read package directory {}", dir.display()),
                    e,
                ));
            }
        };

        for entry in entries {
            let Some(name) = entry.file_name().map(str::to_string) else {
                continue;
            };
            if !entry.path.is_dir() {
                continue;
            }
            let versions = kiln_utils::list_dir(&entry.path).map_err(|e| {
                BuildError::io(format!("failed to read {}", entry.path.display()), e)
            })?;
            let mut candidates = Vec::new();
            for version_entry in versions {
                let Some(raw) = version_entry.file_name().map(str::to_string) else {
                    continue;
                };
                let Ok(version) = raw.parse::<Version>() else {
                    tracing::debug!(package = %name, entry = %raw, "Skipping non-version entry");
                    continue;
                };
                let path = version_entry.path;
                if !path.is_dir() {
                    continue;
                }
                let requires = read_requires(&path)?;
                candidates.push(Candidate {
                    name: name.clone(),
                    version,
                    path,
                    requires,
                });
            }
            // Highest first.
            candidates.sort_by(|a, b| b.version.cmp(&a.version));
            index
                .packages
                .entry(normalize_name(&name))
                .or_default()
                .extend(candidates);
        }
        Ok(index)
    }

    #[must_use]
    pub fn candidates(&self, name: &str) -> &[Candidate] {
        self.packages
            .get(&normalize_name(name))
            .map_or(&[], Vec::as_slice)
    }

    /// Highest version of `name`, ignoring constraints.
    #[must_use]
    pub fn latest(&self, name: &str) -> Option<&Candidate> {
        self.candidates(name).first()
    }

    /// Resolve `roots` and everything they require, sorted by name.
    pub fn resolve(&self, roots: &[Requirement]) -> Result<Vec<&Candidate>, BuildError> {
        let mut chosen: BTreeMap<String, &Candidate> = BTreeMap::new();

        for _ in 0..MAX_ROUNDS {
            let constraints = self.constraints(roots, &chosen);
            let mut next: BTreeMap<String, &Candidate> = BTreeMap::new();
            for (key, wanted) in &constraints {
                let candidates = self.packages.get(key).map_or(&[][..], Vec::as_slice);
                if candidates.is_empty() {
                    return Err(BuildError::Resolution(format!(
                        "no package named '{}' in the package source (required by {})",
                        wanted[0].requirement.name(),
                        describe_origins(wanted)
                    )));
                }
                let best = candidates
                    .iter()
                    .find(|c| wanted.iter().all(|w| w.requirement.matches(&c.version)))
                    .ok_or_else(|| {
                        BuildError::Resolution(format!(
                            "no version of '{}' satisfies {} (available: {})",
                            wanted[0].requirement.name(),
                            describe_constraints(wanted),
                            candidates
                                .iter()
                                .map(|c| c.version.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ))
                    })?;
                next.insert(key.clone(), best);
            }

            let settled = next.len() == chosen.len()
                && next
                    .iter()
                    .all(|(k, c)| chosen.get(k).is_some_and(|prev| prev.version == c.version));
            chosen = next;
            if settled {
                return Ok(chosen.into_values().collect());
            }
        }

        Err(BuildError::Resolution(format!(
            "dependency resolution did not settle after {MAX_ROUNDS} rounds"
        )))
    }

    fn constraints<'a>(
        &self,
        roots: &'a [Requirement],
        chosen: &BTreeMap<String, &'a Candidate>,
    ) -> BTreeMap<String, Vec<Constraint<'a>>> {
        let mut constraints: BTreeMap<String, Vec<Constraint<'a>>> = BTreeMap::new();
        for requirement in roots {
            constraints
                .entry(requirement.key())
                .or_default()
                .push(Constraint {
                    requirement,
                    origin: None,
                });
        }
        for candidate in chosen.values() {
            for requirement in &candidate.requires {
                constraints
                    .entry(requirement.key())
                    .or_default()
                    .push(Constraint {
                        requirement,
                        origin: Some(candidate),
                    });
            }
        }
        constraints
    }
}

struct Constraint<'a> {
    requirement: &'a Requirement,
    /// `None` for the manifest itself.
    origin: Option<&'a Candidate>,
}

fn describe_origins(constraints: &[Constraint<'_>]) -> String {
    constraints
        .iter()
        .map(|c| c.origin.map_or_else(|| "the manifest".to_string(), ToString::to_string))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_constraints(constraints: &[Constraint<'_>]) -> String {
    constraints
        .iter()
        .map(|c| {
            let origin = c
                .origin
                .map_or_else(|| "manifest".to_string(), ToString::to_string);
            format!("'{}' (from {origin})", c.requirement)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_requires(dist: &Path) -> Result<Vec<Requirement>, BuildError> {
    let path = dist.join(PACKAGE_METADATA_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BuildError::io(format!("failed to read {}", path.display()), e)),
    };
    let metadata: PackageMetadata = toml::from_str(&text).map_err(|e| {
        BuildError::Resolution(format!("invalid package metadata {}: {e}", path.display()))
    })?;
    metadata
        .requires
        .iter()
        .map(|raw| {
            raw.parse::<Requirement>().map_err(|e| {
                BuildError::Resolution(format!("invalid requirement in {}: {e}", path.display()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use kiln_types::Requirement;

    use super::{PACKAGE_METADATA_FILE, PackageIndex};
    use crate::error::BuildError;

    fn publish(dir: &Path, name: &str, version: &str, requires: &[&str]) {
        let dist = dir.join(name).join(version);
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("__init__.py"), format!("VERSION = '{version}'\n")).unwrap();
        if !requires.is_empty() {
            let list = requires
                .iter()
                .map(|r| format!("\"{r}\""))
                .collect::<Vec<_>>()
                .join(", ");
            fs::write(
                dist.join(PACKAGE_METADATA_FILE),
                format!("requires = [{list}]\n"),
            )
            .unwrap();
        }
    }

    fn reqs(lines: &[&str]) -> Vec<Requirement> {
        lines.iter().map(|l| l.parse().unwrap()).collect()
    }

    fn resolved(index: &PackageIndex, lines: &[&str]) -> Result<Vec<String>, BuildError> {
        let roots = reqs(lines);
        Ok(index
            .resolve(&roots)?
            .into_iter()
            .map(ToString::to_string)
            .collect())
    }

    #[test]
    fn picks_highest_matching_version() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "x", "1.0", &[]);
        publish(dir.path(), "x", "1.2", &[]);
        publish(dir.path(), "x", "2.0", &[]);
        let index = PackageIndex::scan(dir.path()).unwrap();

        assert_eq!(resolved(&index, &["X==1.0"]).unwrap(), ["x 1.0"]);
        assert_eq!(resolved(&index, &["x>=1,<2"]).unwrap(), ["x 1.2"]);
        assert_eq!(resolved(&index, &["x"]).unwrap(), ["x 2.0"]);
    }

    #[test]
    fn follows_requires_transitively() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "aiogram", "3.4", &["aiohttp>=3.9"]);
        publish(dir.path(), "aiohttp", "3.8", &[]);
        publish(dir.path(), "aiohttp", "3.9", &["yarl"]);
        publish(dir.path(), "yarl", "1.9", &[]);
        let index = PackageIndex::scan(dir.path()).unwrap();

        assert_eq!(
            resolved(&index, &["aiogram"]).unwrap(),
            ["aiogram 3.4", "aiohttp 3.9", "yarl 1.9"]
        );
    }

    #[test]
    fn unknown_version_is_a_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "y", "1.0", &[]);
        let index = PackageIndex::scan(dir.path()).unwrap();

        let err = resolved(&index, &["Y==999.0"]).unwrap_err();
        match err {
            BuildError::Resolution(message) => {
                assert!(message.contains("==999.0"), "{message}");
                assert!(message.contains("available: 1.0"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            resolved(&index, &["nothere"]),
            Err(BuildError::Resolution(_))
        ));
    }

    #[test]
    fn conflicting_constraints_fail() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "a", "1.0", &["c<2"]);
        publish(dir.path(), "b", "1.0", &["c>=2"]);
        publish(dir.path(), "c", "1.0", &[]);
        publish(dir.path(), "c", "2.0", &[]);
        let index = PackageIndex::scan(dir.path()).unwrap();

        let err = resolved(&index, &["a", "b"]).unwrap_err();
        assert!(matches!(err, BuildError::Resolution(ref m) if m.contains("'c")), "{err}");
    }

    #[test]
    fn names_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "python_dotenv", "1.0.1", &[]);
        let index = PackageIndex::scan(dir.path()).unwrap();
        assert_eq!(
            resolved(&index, &["Python-Dotenv>=1.0"]).unwrap(),
            ["python_dotenv 1.0.1"]
        );
        assert!(index.latest("python.dotenv").is_some());
    }
}
