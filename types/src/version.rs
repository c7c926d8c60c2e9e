use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{0}'")]
pub struct VersionError(pub String);

/// A dotted release version with an optional trailing label (`1.0`, `2.31.0`, `1.0rc1`).
///
/// Ordering compares release segments numerically with missing segments
/// treated as zero, so `1.0 == 1.0.0`. A labelled version sorts before the
/// plain release it labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    release: Vec<u64>,
    label: Option<String>,
    raw: String,
}

impl Version {
    #[must_use]
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `self` starts with every segment of `prefix` (`1.4.2` has prefix `1.4`).
    #[must_use]
    pub fn has_prefix(&self, prefix: &[u64]) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, seg)| self.release.get(i).copied().unwrap_or(0) == *seg)
    }

    fn release_cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(VersionError(s.to_string()));
        }
        let split = raw
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map_or(raw.len(), |(i, _)| i);
        let (numeric, label) = raw.split_at(split);
        let numeric = numeric.trim_end_matches('.');
        if numeric.is_empty() {
            return Err(VersionError(s.to_string()));
        }
        let release = numeric
            .split('.')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionError(s.to_string()))?;
        let label = label.trim_start_matches(['.', '-', '_']);
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(VersionError(s.to_string()));
        }
        Ok(Self {
            release,
            label: (!label.is_empty()).then(|| label.to_ascii_lowercase()),
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_cmp(other)
            .then_with(|| match (&self.label, &other.label) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::Version;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn missing_segments_compare_as_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
    }

    #[test]
    fn labelled_versions_sort_before_release() {
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0a1") < v("1.0b1"));
        assert!(v("1.0rc1") > v("0.9"));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("abc".parse::<Version>().is_err());
        assert!("1..2".parse::<Version>().is_err());
        assert!("1.0/../x".parse::<Version>().is_err());
    }

    #[test]
    fn prefix_matching() {
        assert!(v("1.4.2").has_prefix(&[1, 4]));
        assert!(!v("1.5.0").has_prefix(&[1, 4]));
    }
}
