//! Secret redaction for anything Kiln prints or logs.
//!
//! External tool output (package manager stderr) and settings reports can
//! echo values of credential-like environment variables. [`SecretRedactor`]
//! collects those values once and replaces them with `[REDACTED]` using an
//! Aho-Corasick automaton.

use std::borrow::Cow;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Variable-name patterns whose values are treated as secrets.
pub const CREDENTIAL_VAR_PATTERNS: &[&str] = &[
    "*_TOKEN",
    "*_SECRET",
    "*_KEY",
    "*_PASSWORD",
    "*_DSN",
    "*_URL",
];

/// Values shorter than this are never treated as secrets ("1", "true", "main").
const MIN_SECRET_LENGTH: usize = 8;

pub struct SecretRedactor {
    secrets: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl std::fmt::Debug for SecretRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRedactor")
            .field("secret_count", &self.secrets.len())
            .finish_non_exhaustive()
    }
}

impl SecretRedactor {
    /// Build from `(name, value)` pairs, keeping values of credential-like names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let matcher = credential_matcher();
        let mut secrets: Vec<String> = pairs
            .into_iter()
            .filter(|(name, _)| matcher.is_match(name.as_ref()))
            .map(|(_, value)| value.as_ref().trim().to_string())
            .filter(|v| v.len() >= MIN_SECRET_LENGTH)
            .filter(|v| !looks_like_plain_url(v))
            .collect();

        // Longest first so overlapping secrets redact fully.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        let automaton = if secrets.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .build(&secrets)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!(
                        secret_count = secrets.len(),
                        "SecretRedactor automaton build failed; using fallback redaction ({e})"
                    );
                    None
                }
            }
        };

        tracing::debug!(secret_count = secrets.len(), "SecretRedactor initialized");
        Self { secrets, automaton }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.secrets.is_empty() {
            return Cow::Borrowed(input);
        }

        if let Some(ac) = &self.automaton {
            let mut result = String::with_capacity(input.len());
            ac.replace_all_with(input, &mut result, |_, _, dst| {
                dst.push_str("[REDACTED]");
                true
            });
            return Cow::Owned(result);
        }

        let mut output: Option<String> = None;
        for secret in &self.secrets {
            let haystack = output.as_deref().unwrap_or(input);
            if haystack.contains(secret.as_str()) {
                output = Some(haystack.replace(secret.as_str(), "[REDACTED]"));
            }
        }
        output.map_or(Cow::Borrowed(input), Cow::Owned)
    }

    #[must_use]
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }
}

fn credential_matcher() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in CREDENTIAL_VAR_PATTERNS {
        if let Ok(glob) = GlobBuilder::new(pattern).case_insensitive(true).build() {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// `*_URL` values are only secret when they carry userinfo (`user:pass@host`).
fn looks_like_plain_url(value: &str) -> bool {
    let Some((_, rest)) = value.split_once("://") else {
        return false;
    };
    let authority = rest.split_once('/').map_or(rest, |(authority, _)| authority);
    !authority.contains('@') && !value.contains("token=") && !value.contains("key=")
}

static ENV_REDACTOR: OnceLock<SecretRedactor> = OnceLock::new();

/// Process-wide redactor over the current environment, built on first use.
pub fn env_redactor() -> &'static SecretRedactor {
    ENV_REDACTOR.get_or_init(SecretRedactor::from_env)
}
