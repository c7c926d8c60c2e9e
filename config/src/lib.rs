//! Configuration loading for Kiln.
//!
//! Three inputs live here:
//!
//! - the tool configuration (`~/.kiln/config.toml`): where images are stored,
//!   which backend assembles them and the backend's command templates;
//! - the build recipe (`Kilnfile.toml`) of a build context, see [`recipe`];
//! - the service settings schema validated by `kiln check-env`, see [`service`].

pub mod recipe;
pub mod service;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;

pub use recipe::{RECIPE_FILE_NAME, load_recipe, parse_recipe};
pub use service::{
    EnvSources, SERVICE_SCHEMA, ServiceSettings, SettingsError, SettingsIssue, TemplateWarning,
    VarKind, VarSpec, lint_template,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown backend '{0}' (expected 'local' or 'command')")]
    UnknownBackend(String),
    #[error("cannot determine the Kiln home directory; set KILN_HOME")]
    NoHome,
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            _ => None,
        }
    }
}

// ============================================================================
// Raw tool configuration
// ============================================================================

/// `~/.kiln/config.toml`.
///
/// ```toml
/// [store]
/// root = "~/.kiln"
///
/// [backend]
/// kind = "local"
/// source = "${KILN_HOME}/source"
/// runtimes = "/srv/kiln/runtimes"
///
/// [backend.commands]
/// refresh_index = "chroot {root} apt-get update"
///
/// [backend.shell]
/// binary = "bash"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    pub store: Option<StoreConfig>,
    pub backend: Option<BackendConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Root for `images/` (and the default `source/` and `runtimes/`).
    pub root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub kind: Option<String>,
    /// Offline package source for the local backend.
    pub source: Option<String>,
    /// Directory of base runtime trees, `<runtimes>/<id>/<tag>/`.
    pub runtimes: Option<String>,
    pub commands: Option<CommandTemplatesConfig>,
    pub shell: Option<ShellConfig>,
}

/// Command templates for the command backend. Unset entries use the defaults
/// in [`CommandTemplates::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandTemplatesConfig {
    pub refresh_index: Option<String>,
    pub install_packages: Option<String>,
    pub clean_index: Option<String>,
    pub upgrade_installer: Option<String>,
    pub install_dependencies: Option<String>,
}

/// Shell configuration for command execution.
///
/// ```toml
/// [backend.shell]
/// binary = "bash"
/// args = ["-c"]
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/dash").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]`).
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `"kiln_engine=debug,info"`.
    pub filter: Option<String>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Local,
    Command,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "command" | "commands" => Ok(Self::Command),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Command => "command",
        })
    }
}

/// Shell command templates.
///
/// Placeholders: `{root}` (staging rootfs on the host), `{workdir}` (image
/// workdir), `{packages}`, `{installer}`, `{manifest}` (path relative to the
/// workdir). Substituted values are shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    pub refresh_index: String,
    pub install_packages: String,
    pub clean_index: String,
    pub upgrade_installer: String,
    pub install_dependencies: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            refresh_index: "chroot {root} apt-get update".into(),
            install_packages:
                "chroot {root} apt-get install -y --no-install-recommends {packages}".into(),
            clean_index: "find {root}/var/lib/apt/lists -mindepth 1 -delete".into(),
            upgrade_installer: "chroot {root} python -m pip install --upgrade {installer}".into(),
            install_dependencies:
                "chroot {root} python -m pip install --no-cache-dir -r {workdir}/{manifest}".into(),
        }
    }
}

impl CommandTemplates {
    fn from_config(raw: Option<&CommandTemplatesConfig>) -> Self {
        let mut templates = Self::default();
        let Some(raw) = raw else {
            return templates;
        };
        let overrides = [
            (&raw.refresh_index, &mut templates.refresh_index),
            (&raw.install_packages, &mut templates.install_packages),
            (&raw.clean_index, &mut templates.clean_index),
            (&raw.upgrade_installer, &mut templates.upgrade_installer),
            (&raw.install_dependencies, &mut templates.install_dependencies),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        templates
    }
}

/// Command-line overrides applied on top of the tool configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub runtimes: Option<PathBuf>,
    pub backend: Option<BackendKind>,
}

/// Fully-resolved settings: every path is absolute-or-explicit, every template set.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store_root: PathBuf,
    pub source_dir: PathBuf,
    pub runtimes_dir: PathBuf,
    pub backend: BackendKind,
    pub templates: CommandTemplates,
    pub shell: Option<ShellConfig>,
    pub log_filter: Option<String>,
}

impl ResolvedConfig {
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.store_root.join("images")
    }
}

impl KilnConfig {
    /// Load the tool configuration; a missing file yields `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn resolve(&self, overrides: &Overrides) -> Result<ResolvedConfig, ConfigError> {
        let backend_cfg = self.backend.as_ref();

        let store_root = match (&overrides.store, self.store.as_ref().and_then(|s| s.root.as_deref())) {
            (Some(path), _) => path.clone(),
            (None, Some(raw)) => expand_path(raw),
            (None, None) => kiln_home().ok_or(ConfigError::NoHome)?,
        };

        let source_dir = match (&overrides.source, backend_cfg.and_then(|b| b.source.as_deref())) {
            (Some(path), _) => path.clone(),
            (None, Some(raw)) => expand_path(raw),
            (None, None) => store_root.join("source"),
        };

        let runtimes_dir = match (
            &overrides.runtimes,
            backend_cfg.and_then(|b| b.runtimes.as_deref()),
        ) {
            (Some(path), _) => path.clone(),
            (None, Some(raw)) => expand_path(raw),
            (None, None) => store_root.join("runtimes"),
        };

        let backend = match (overrides.backend, backend_cfg.and_then(|b| b.kind.as_deref())) {
            (Some(kind), _) => kind,
            (None, Some(raw)) => raw.parse()?,
            (None, None) => BackendKind::default(),
        };

        Ok(ResolvedConfig {
            store_root,
            source_dir,
            runtimes_dir,
            backend,
            templates: CommandTemplates::from_config(backend_cfg.and_then(|b| b.commands.as_ref())),
            shell: backend_cfg.and_then(|b| b.shell.clone()),
            log_filter: self.log.as_ref().and_then(|l| l.filter.clone()),
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

/// `$KILN_HOME`, else `~/.kiln`.
#[must_use]
pub fn kiln_home() -> Option<PathBuf> {
    if let Some(home) = env::var_os("KILN_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|home| home.join(".kiln"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    kiln_home().map(|home| home.join("config.toml"))
}

/// Expand a leading `~/` and `${VAR}` references. Unset variables expand to "".
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env_vars(raw);
    if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |var| env::var(var).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&lookup(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
