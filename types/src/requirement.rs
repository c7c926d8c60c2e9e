//! Dependency requirements and the manifest that lists them.
//!
//! The accepted grammar is the subset of requirement lines the reference
//! bootstrap relies on: a distribution name, optional extras, and a
//! comma-separated list of version clauses. Environment markers (`; ...`) are
//! kept verbatim but not evaluated.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{Version, VersionError};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(.*)$")
        .expect("requirement name regex is valid")
});

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(===|==|!=|>=|<=|~=|>|<)\s*([A-Za-z0-9._*+!-]+)$")
        .expect("requirement clause regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementError {
    #[error("empty requirement")]
    Empty,
    #[error("invalid requirement '{0}'")]
    Malformed(String),
    #[error("invalid version clause '{clause}' in '{line}'")]
    BadClause { line: String, clause: String },
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<RequirementError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Eq,
    NotEq,
    Ge,
    Gt,
    Le,
    Lt,
    Compatible,
}

impl Op {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "==" | "===" => Self::Eq,
            "!=" => Self::NotEq,
            ">=" => Self::Ge,
            ">" => Self::Gt,
            "<=" => Self::Le,
            "<" => Self::Lt,
            "~=" => Self::Compatible,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Lt => "<",
            Self::Compatible => "~=",
        }
    }
}

/// One `op version` clause. `==1.*` is stored as a prefix match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    op: Op,
    version: Version,
    wildcard: bool,
}

impl Clause {
    #[must_use]
    pub fn op(&self) -> Op {
        self.op
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[must_use]
    pub fn matches(&self, candidate: &Version) -> bool {
        if self.wildcard {
            let hit = candidate.has_prefix(self.version.release());
            return match self.op {
                Op::NotEq => !hit,
                _ => hit,
            };
        }
        match self.op {
            Op::Eq => candidate == &self.version,
            Op::NotEq => candidate != &self.version,
            Op::Ge => candidate >= &self.version,
            Op::Gt => candidate > &self.version,
            Op::Le => candidate <= &self.version,
            Op::Lt => candidate < &self.version,
            Op::Compatible => {
                let release = self.version.release();
                let prefix = &release[..release.len().saturating_sub(1).max(1)];
                candidate >= &self.version && candidate.has_prefix(prefix)
            }
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// A single dependency requirement (`requests>=2.31,<3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    name: String,
    extras: Vec<String>,
    clauses: Vec<Clause>,
    marker: Option<String>,
}

impl Requirement {
    /// Name as written in the manifest.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-folded name with runs of `-`, `_` and `.` collapsed to `-`.
    #[must_use]
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    #[must_use]
    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    #[must_use]
    pub fn matches(&self, candidate: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(candidate))
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if line.is_empty() {
            return Err(RequirementError::Empty);
        }
        let (spec, marker) = match line.split_once(';') {
            Some((spec, marker)) => (spec.trim(), Some(marker.trim().to_string())),
            None => (line, None),
        };
        let caps = NAME_RE
            .captures(spec)
            .ok_or_else(|| RequirementError::Malformed(line.to_string()))?;
        let name = caps[1].to_string();
        let extras = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let rest = caps.get(3).map_or("", |m| m.as_str()).trim();

        let mut clauses = Vec::new();
        if !rest.is_empty() {
            for raw in rest.split(',') {
                let raw = raw.trim();
                let bad = || RequirementError::BadClause {
                    line: line.to_string(),
                    clause: raw.to_string(),
                };
                let cap = CLAUSE_RE.captures(raw).ok_or_else(bad)?;
                let op = Op::parse(&cap[1]).ok_or_else(bad)?;
                let text = &cap[2];
                let (text, wildcard) = match text.strip_suffix(".*") {
                    Some(prefix) if matches!(op, Op::Eq | Op::NotEq) => (prefix, true),
                    Some(_) => return Err(bad()),
                    None => (text, false),
                };
                clauses.push(Clause {
                    op,
                    version: text.parse()?,
                    wildcard,
                });
            }
        }

        Ok(Self {
            name,
            extras,
            clauses,
            marker,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        let clauses: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        f.write_str(&clauses.join(","))?;
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Parsed dependency manifest (`requirements.txt`).
///
/// Installer option lines (`--index-url ...`, `-r other.txt`) are kept verbatim
/// in `options` for the backend to interpret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    requirements: Vec<Requirement>,
    options: Vec<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, RequirementError> {
        let mut manifest = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('-') {
                manifest.options.push(line.to_string());
                continue;
            }
            let req = line
                .parse::<Requirement>()
                .map_err(|source| RequirementError::AtLine {
                    line: idx + 1,
                    source: Box::new(source),
                })?;
            manifest.requirements.push(req);
        }
        Ok(manifest)
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }
}

/// Strip a `#` comment that starts the line or follows whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}
