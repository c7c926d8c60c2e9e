//! `KEY=value` files: the configuration template and `.env` files.

use thiserror::Error;

use crate::recipe::is_env_name;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvFileError {
    #[error("line {line}: expected KEY=value")]
    MissingEquals { line: usize },
    #[error("line {line}: invalid variable name '{name}'")]
    InvalidName { line: usize, name: String },
    #[error("line {line}: unterminated quoted value")]
    UnterminatedQuote { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

/// Ordered entries of a dotenv-style file.
///
/// Accepts `KEY=value`, `export KEY=value`, single or double quoted values and
/// `#` comments. Later duplicates override earlier ones on lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<EnvEntry>,
}

impl EnvFile {
    pub fn parse(text: &str) -> Result<Self, EnvFileError> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").map_or(line, str::trim_start);
            let (key, value) = line
                .split_once('=')
                .ok_or(EnvFileError::MissingEquals { line: line_no })?;
            let key = key.trim();
            if !is_env_name(key) {
                return Err(EnvFileError::InvalidName {
                    line: line_no,
                    name: key.to_string(),
                });
            }
            entries.push(EnvEntry {
                key: key.to_string(),
                value: parse_value(value.trim(), line_no)?,
                line: line_no,
            });
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[EnvEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Distinct keys in first-appearance order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.key.as_str()) {
                seen.push(entry.key.as_str());
            }
        }
        seen
    }
}

fn parse_value(value: &str, line: usize) -> Result<String, EnvFileError> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            let end = rest
                .find(quote)
                .ok_or(EnvFileError::UnterminatedQuote { line })?;
            let inner = &rest[..end];
            if quote == '"' {
                return Ok(inner.replace("\\n", "\n").replace("\\\"", "\""));
            }
            return Ok(inner.to_string());
        }
    }
    // Unquoted: an inline comment needs whitespace before '#'.
    let value = match value.find(" #") {
        Some(i) => &value[..i],
        None => value,
    };
    Ok(value.trim_end().to_string())
}
