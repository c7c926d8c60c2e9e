//! The declarative build description (`Kilnfile.toml`).
//!
//! Raw deserialization structs stay private; the public [`Recipe`] is built
//! through `#[serde(try_from)]`, so holding one proves every path, name and
//! command in it passed validation. Omitted values fall back to the reference
//! bootstrap: `python:3.11-slim`, `/app`, `build-essential`,
//! `requirements.txt` + `README.md`, `bot/`, `.env.example` and
//! `python -m bot.main`.

use std::collections::BTreeMap;
use std::fmt;

use globset::Glob;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::{RuntimeRef, RuntimeRefError};

pub const DEFAULT_RUNTIME_ID: &str = "python";
pub const DEFAULT_RUNTIME_TAG: &str = "3.11-slim";
pub const DEFAULT_WORKDIR: &str = "/app";
pub const DEFAULT_SYSTEM_PACKAGES: &[&str] = &["build-essential"];
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const DEFAULT_DOCS: &[&str] = &["README.md"];
pub const DEFAULT_INSTALLER: &str = "pip";
pub const DEFAULT_SOURCE: &str = "bot";
pub const DEFAULT_CONFIG_TEMPLATE: &str = ".env.example";
pub const DEFAULT_ENTRYPOINT: &[&str] = &["python", "-m", "bot.main"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Runtime(#[from] RuntimeRefError),
    #[error("workdir '{0}' must be an absolute path without '..'")]
    Workdir(String),
    #[error("{field} path '{path}' must be relative to the build context and stay inside it")]
    InputPath { field: &'static str, path: String },
    #[error("image name '{0}' may only contain [A-Za-z0-9._-] and must not start with '.'")]
    ImageName(String),
    #[error("invalid system package name '{0}'")]
    PackageName(String),
    #[error("invalid installer name '{0}'")]
    InstallerName(String),
    #[error("{0} command must not be empty")]
    EmptyCommand(String),
    #[error("invalid command name '{0}'")]
    CommandName(String),
    #[error("invalid environment variable name '{0}'")]
    EnvName(String),
    #[error("invalid exclude pattern '{pattern}': {message}")]
    Exclude { pattern: String, message: String },
}

// ============================================================================
// Path newtypes
// ============================================================================

/// Absolute path inside the image (`/app`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImagePath(String);

impl ImagePath {
    pub fn new(value: impl Into<String>) -> Result<Self, RecipeError> {
        let value = value.into();
        let trimmed = value.trim_end_matches('/');
        let ok = value.starts_with('/')
            && trimmed.split('/').skip(1).all(|seg| seg != ".." && seg != ".");
        if !ok {
            return Err(RecipeError::Workdir(value));
        }
        let normalized = if trimmed.is_empty() { "/" } else { trimmed };
        Ok(Self(collapse_slashes(normalized)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path without its leading `/`, for joining under a rootfs.
    #[must_use]
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches('/')
    }
}

impl TryFrom<String> for ImagePath {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ImagePath> for String {
    fn from(value: ImagePath) -> Self {
        value.0
    }
}

impl fmt::Display for ImagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path relative to the build context (or to the workdir) that cannot escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    pub fn new(field: &'static str, value: impl Into<String>) -> Result<Self, RecipeError> {
        let value = value.into();
        let cleaned = value.replace('\\', "/");
        let cleaned = cleaned.trim_start_matches("./").trim_end_matches('/');
        let ok = !cleaned.is_empty()
            && !cleaned.starts_with('/')
            && !cleaned.contains(':')
            && cleaned.split('/').all(|seg| seg != "..");
        if !ok {
            return Err(RecipeError::InputPath { field, path: value });
        }
        let segments: Vec<&str> = cleaned
            .split('/')
            .filter(|seg| !seg.is_empty() && *seg != ".")
            .collect();
        if segments.is_empty() {
            return Err(RecipeError::InputPath { field, path: value });
        }
        Ok(Self(segments.join("/")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new("path", value)
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.0
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    out
}

// ============================================================================
// Raw TOML shape
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecipe {
    name: Option<String>,
    workdir: Option<String>,
    runtime: Option<RuntimeRef>,
    #[serde(default)]
    system: RawSystem,
    #[serde(default)]
    dependencies: RawDependencies,
    #[serde(default)]
    source: RawSource,
    #[serde(default)]
    config_template: RawTemplate,
    #[serde(default)]
    entrypoint: RawEntrypoint,
    #[serde(default)]
    commands: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSystem {
    packages: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependencies {
    manifest: Option<String>,
    docs: Option<Vec<String>>,
    installer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    path: Option<String>,
    dest: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntrypoint {
    command: Option<Vec<String>>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

// ============================================================================
// Validated recipe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemSpec {
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencySpec {
    pub manifest: RelPath,
    pub docs: Vec<RelPath>,
    pub installer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSpec {
    pub path: RelPath,
    /// Subpath of the workdir the source lands in.
    pub dest: RelPath,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntrypoint")]
pub struct Entrypoint {
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

impl TryFrom<RawEntrypoint> for Entrypoint {
    type Error = RecipeError;

    fn try_from(raw: RawEntrypoint) -> Result<Self, Self::Error> {
        Self::new(
            raw.command
                .unwrap_or_else(|| to_strings(DEFAULT_ENTRYPOINT)),
            raw.env,
        )
    }
}

impl Entrypoint {
    pub fn new(
        command: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Result<Self, RecipeError> {
        validate_command("entrypoint", &command)?;
        for key in env.keys() {
            if !is_env_name(key) {
                return Err(RecipeError::EnvName(key.clone()));
            }
        }
        Ok(Self { command, env })
    }

    /// Non-empty argv; `program()` is its first element.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRecipe")]
pub struct Recipe {
    name: Option<String>,
    workdir: ImagePath,
    runtime: RuntimeRef,
    system: SystemSpec,
    dependencies: DependencySpec,
    source: SourceSpec,
    config_template: RelPath,
    entrypoint: Entrypoint,
    commands: BTreeMap<String, Vec<String>>,
}

impl Default for Recipe {
    fn default() -> Self {
        Self::try_from(RawRecipe::default()).expect("default recipe is valid")
    }
}

impl TryFrom<RawRecipe> for Recipe {
    type Error = RecipeError;

    fn try_from(raw: RawRecipe) -> Result<Self, Self::Error> {
        if let Some(name) = &raw.name {
            validate_image_name(name)?;
        }

        let workdir = ImagePath::new(raw.workdir.unwrap_or_else(|| DEFAULT_WORKDIR.into()))?;
        let runtime = match raw.runtime {
            Some(runtime) => runtime,
            None => RuntimeRef::new(DEFAULT_RUNTIME_ID, DEFAULT_RUNTIME_TAG)?,
        };

        let packages = raw
            .system
            .packages
            .unwrap_or_else(|| to_strings(DEFAULT_SYSTEM_PACKAGES));
        for pkg in &packages {
            if !is_package_name(pkg) {
                return Err(RecipeError::PackageName(pkg.clone()));
            }
        }

        let manifest = RelPath::new(
            "manifest",
            raw.dependencies
                .manifest
                .unwrap_or_else(|| DEFAULT_MANIFEST.into()),
        )?;
        let docs = raw
            .dependencies
            .docs
            .unwrap_or_else(|| to_strings(DEFAULT_DOCS))
            .into_iter()
            .map(|d| RelPath::new("docs", d))
            .collect::<Result<Vec<_>, _>>()?;
        let installer = raw
            .dependencies
            .installer
            .unwrap_or_else(|| DEFAULT_INSTALLER.into());
        if !is_package_name(&installer) {
            return Err(RecipeError::InstallerName(installer));
        }

        let source_path = RelPath::new(
            "source",
            raw.source.path.unwrap_or_else(|| DEFAULT_SOURCE.into()),
        )?;
        let dest = match raw.source.dest {
            Some(dest) => RelPath::new("source.dest", dest)?,
            None => RelPath::new("source.dest", source_path.file_name())?,
        };
        for pattern in &raw.source.exclude {
            Glob::new(pattern).map_err(|e| RecipeError::Exclude {
                pattern: pattern.clone(),
                message: e.kind().to_string(),
            })?;
        }

        let config_template = RelPath::new(
            "config_template",
            raw.config_template
                .path
                .unwrap_or_else(|| DEFAULT_CONFIG_TEMPLATE.into()),
        )?;

        let entrypoint = Entrypoint::try_from(raw.entrypoint)?;

        for (name, command) in &raw.commands {
            if !is_command_name(name) {
                return Err(RecipeError::CommandName(name.clone()));
            }
            validate_command(name, command)?;
        }

        Ok(Self {
            name: raw.name,
            workdir,
            runtime,
            system: SystemSpec { packages },
            dependencies: DependencySpec {
                manifest,
                docs,
                installer,
            },
            source: SourceSpec {
                path: source_path,
                dest,
                exclude: raw.source.exclude,
            },
            config_template,
            entrypoint,
            commands: raw.commands,
        })
    }
}

impl Recipe {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn workdir(&self) -> &ImagePath {
        &self.workdir
    }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    #[must_use]
    pub fn system(&self) -> &SystemSpec {
        &self.system
    }

    #[must_use]
    pub fn dependencies(&self) -> &DependencySpec {
        &self.dependencies
    }

    #[must_use]
    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    #[must_use]
    pub fn config_template(&self) -> &RelPath {
        &self.config_template
    }

    #[must_use]
    pub fn entrypoint(&self) -> &Entrypoint {
        &self.entrypoint
    }

    #[must_use]
    pub fn commands(&self) -> &BTreeMap<String, Vec<String>> {
        &self.commands
    }

    /// Every build-context input the recipe reads, in pipeline order.
    #[must_use]
    pub fn inputs(&self) -> Vec<&RelPath> {
        let mut inputs = vec![&self.dependencies.manifest];
        inputs.extend(self.dependencies.docs.iter());
        inputs.push(&self.source.path);
        inputs.push(&self.config_template);
        inputs
    }
}

pub fn validate_image_name(name: &str) -> Result<(), RecipeError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(RecipeError::ImageName(name.to_string()))
    }
}

fn validate_command(label: &str, command: &[String]) -> Result<(), RecipeError> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(RecipeError::EmptyCommand(label.to_string())),
    }
}

/// Package names end up in shell command lines, so the alphabet is strict.
fn is_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '_' | '-' | ':' | '='))
}

fn is_command_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

pub(crate) fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
