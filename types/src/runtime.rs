use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeRefError {
    #[error("runtime id must not be empty")]
    EmptyId,
    #[error("runtime tag must not be empty")]
    EmptyTag,
    #[error("runtime reference '{0}' must look like <id>:<tag>")]
    Malformed(String),
    #[error("runtime {field} '{value}' may only contain [A-Za-z0-9._-]")]
    InvalidChars { field: &'static str, value: String },
}

#[derive(Deserialize)]
struct RawRuntimeRef {
    id: String,
    tag: String,
}

/// A pinned base runtime: identifier plus version tag (`python:3.11-slim`).
///
/// Both parts are restricted to a path-safe alphabet because they are used to
/// locate the base tree inside the runtime store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRuntimeRef")]
pub struct RuntimeRef {
    id: String,
    tag: String,
}

impl RuntimeRef {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Result<Self, RuntimeRefError> {
        let id = id.into();
        let tag = tag.into();
        if id.trim().is_empty() {
            return Err(RuntimeRefError::EmptyId);
        }
        if tag.trim().is_empty() {
            return Err(RuntimeRefError::EmptyTag);
        }
        check_chars("id", &id)?;
        check_chars("tag", &tag)?;
        Ok(Self { id, tag })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

fn check_chars(field: &'static str, value: &str) -> Result<(), RuntimeRefError> {
    let ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    // ".." would walk out of the runtime store.
    if !ok || value == "." || value == ".." {
        return Err(RuntimeRefError::InvalidChars {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl TryFrom<RawRuntimeRef> for RuntimeRef {
    type Error = RuntimeRefError;

    fn try_from(raw: RawRuntimeRef) -> Result<Self, Self::Error> {
        Self::new(raw.id, raw.tag)
    }
}

impl FromStr for RuntimeRef {
    type Err = RuntimeRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, tag) = s
            .split_once(':')
            .ok_or_else(|| RuntimeRefError::Malformed(s.to_string()))?;
        Self::new(id, tag)
    }
}

impl fmt::Display for RuntimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.tag)
    }
}
