//! Typed environment of the packaged service.
//!
//! The build never reads these variables. `kiln check-env` validates them
//! (process environment first, then `.env.local`, then `.env`) and lints the
//! configuration template against [`SERVICE_SCHEMA`].
//!
//! Values are decoded the way the service decodes them at startup: names
//! match case-insensitively, list values are JSON arrays, integers may be
//! negative and a variable set to the empty string is set.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_types::EnvFile;
use thiserror::Error;
use url::Url;

/// Env files read from the settings directory, lowest priority first.
pub const ENV_FILES: &[&str] = &[".env", ".env.local"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Text,
    /// Like `Text`, never echoed back.
    Secret,
    HttpUrl,
    /// JSON array of strings (`["main","support"]`).
    List,
    Seconds,
    Count,
}

impl VarKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            VarKind::Text => "string",
            VarKind::Secret => "secret",
            VarKind::HttpUrl => "http(s) URL",
            VarKind::List => "JSON list of strings",
            VarKind::Seconds => "seconds",
            VarKind::Count => "integer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSpec {
    pub name: &'static str,
    pub kind: VarKind,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl VarSpec {
    const fn required(name: &'static str, kind: VarKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    const fn optional(name: &'static str, kind: VarKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
        }
    }

    const fn defaulted(name: &'static str, kind: VarKind, default: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

pub const SERVICE_SCHEMA: &[VarSpec] = &[
    VarSpec::required("TELEGRAM_BOT_TOKEN", VarKind::Secret),
    VarSpec::required("DB_URL", VarKind::Secret),
    VarSpec::required("REDIS_URL", VarKind::Secret),
    VarSpec::required("HMAC_SECRET", VarKind::Secret),
    VarSpec::required("ADMIN_INITIAL_TOKEN", VarKind::Secret),
    VarSpec::optional("SENTRY_DSN", VarKind::Secret),
    VarSpec::optional("WEBHOOK_BASE_URL", VarKind::HttpUrl),
    VarSpec::defaulted(
        "ALLOWED_ADMIN_ROLES",
        VarKind::List,
        r#"["main","manager","support"]"#,
    ),
    VarSpec::defaulted("VERIFICATION_CODE_TTL", VarKind::Seconds, "600"),
    VarSpec::defaulted("ADMIN_TOKEN_TTL", VarKind::Seconds, "900"),
    VarSpec::defaulted("REFERRAL_REWARD_DAILY_CAP", VarKind::Count, "1000"),
    VarSpec::defaulted("REFERRAL_ACTIVITY_MINUTES", VarKind::Count, "10"),
];

/// Schema entry for `name`, ignoring ASCII case.
#[must_use]
pub fn schema_var(name: &str) -> Option<&'static VarSpec> {
    SERVICE_SCHEMA
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Process,
    File(PathBuf),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Process => f.write_str("environment"),
            Origin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Merged variable values with the source each one came from.
#[derive(Debug, Clone, Default)]
pub struct EnvSources {
    values: BTreeMap<String, (String, Origin)>,
}

impl EnvSources {
    /// Read `.env` and `.env.local` from `dir` and overlay the process environment.
    ///
    /// Missing env files are skipped; malformed ones are reported as issues.
    pub fn load(dir: &Path) -> Result<Self, SettingsError> {
        Self::load_with(dir, std::env::vars())
    }

    pub fn load_with<I>(dir: &Path, process: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut sources = Self::default();
        let mut issues = Vec::new();

        for file_name in ENV_FILES {
            let path = dir.join(file_name);
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    issues.push(SettingsIssue::File {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            match EnvFile::parse(&text) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Loaded env file");
                    for entry in file.entries() {
                        sources.insert(&entry.key, &entry.value, Origin::File(path.clone()));
                    }
                }
                Err(e) => issues.push(SettingsIssue::File {
                    path,
                    message: e.to_string(),
                }),
            }
        }

        for (key, value) in process {
            if schema_var(&key).is_some() {
                sources.insert(&key, &value, Origin::Process);
            }
        }

        if issues.is_empty() {
            Ok(sources)
        } else {
            Err(SettingsError::Invalid(issues))
        }
    }

    /// Schema variables are stored under their canonical name, so
    /// `db_url` and `DB_URL` are the same variable.
    pub fn insert(&mut self, key: &str, value: &str, origin: Origin) {
        self.values
            .insert(canonical_name(key), (value.to_string(), origin));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&canonical_name(key))
            .map(|(value, _)| value.as_str())
    }

    #[must_use]
    pub fn origin(&self, key: &str) -> Option<&Origin> {
        self.values
            .get(&canonical_name(key))
            .map(|(_, origin)| origin)
    }
}

fn canonical_name(key: &str) -> String {
    schema_var(key).map_or_else(|| key.to_string(), |spec| spec.name.to_string())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsIssue {
    Missing {
        name: &'static str,
    },
    /// `message` never contains the value of a secret.
    Invalid {
        name: &'static str,
        message: String,
    },
    File {
        path: PathBuf,
        message: String,
    },
}

impl fmt::Display for SettingsIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsIssue::Missing { name } => write!(f, "{name}: required variable is not set"),
            SettingsIssue::Invalid { name, message } => write!(f, "{name}: {message}"),
            SettingsIssue::File { path, message } => write!(f, "{}: {message}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid service settings:\n{}", format_issues(.0))]
    Invalid(Vec<SettingsIssue>),
}

impl SettingsError {
    #[must_use]
    pub fn issues(&self) -> &[SettingsIssue] {
        match self {
            SettingsError::Invalid(issues) => issues,
        }
    }
}

fn format_issues(issues: &[SettingsIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub telegram_bot_token: String,
    pub db_url: String,
    pub redis_url: String,
    pub hmac_secret: String,
    pub admin_initial_token: String,
    pub sentry_dsn: Option<String>,
    pub webhook_base_url: Option<Url>,
    pub allowed_admin_roles: Vec<String>,
    pub verification_code_ttl_seconds: i64,
    pub admin_token_ttl_seconds: i64,
    pub referral_reward_daily_cap: i64,
    pub referral_activity_minutes_required: i64,
}

// Manual Debug impl to keep credentials out of logs.
impl fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(opt: Option<&String>) -> &'static str {
            if opt.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("ServiceSettings")
            .field("telegram_bot_token", &"[REDACTED]")
            .field("db_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("hmac_secret", &"[REDACTED]")
            .field("admin_initial_token", &"[REDACTED]")
            .field("sentry_dsn", &mask(self.sentry_dsn.as_ref()))
            .field("webhook_base_url", &self.webhook_base_url.as_ref().map(Url::as_str))
            .field("allowed_admin_roles", &self.allowed_admin_roles)
            .field("verification_code_ttl_seconds", &self.verification_code_ttl_seconds)
            .field("admin_token_ttl_seconds", &self.admin_token_ttl_seconds)
            .field("referral_reward_daily_cap", &self.referral_reward_daily_cap)
            .field(
                "referral_activity_minutes_required",
                &self.referral_activity_minutes_required,
            )
            .finish()
    }
}

/// Collects every problem instead of stopping at the first one.
struct Collector<'a> {
    sources: &'a EnvSources,
    issues: Vec<SettingsIssue>,
}

impl Collector<'_> {
    fn raw(&mut self, name: &'static str) -> Option<String> {
        let spec = schema_var(name);
        let value = self
            .sources
            .get(name)
            .map(str::to_string)
            .or_else(|| spec.and_then(|s| s.default).map(str::to_string));
        if value.is_none() && spec.is_some_and(|s| s.required) {
            self.issues.push(SettingsIssue::Missing { name });
        }
        value
    }

    fn text(&mut self, name: &'static str) -> Option<String> {
        self.raw(name)
    }

    fn url(&mut self, name: &'static str) -> Option<Url> {
        let raw = self.raw(name)?;
        match Url::parse(raw.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Some(url),
            Ok(url) => {
                self.issues.push(SettingsIssue::Invalid {
                    name,
                    message: format!("expected an http(s) URL, got scheme '{}'", url.scheme()),
                });
                None
            }
            Err(e) => {
                self.issues.push(SettingsIssue::Invalid {
                    name,
                    message: format!("invalid URL: {e}"),
                });
                None
            }
        }
    }

    fn list(&mut self, name: &'static str) -> Vec<String> {
        let Some(raw) = self.raw(name) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(items) => items,
            Err(e) => {
                self.issues.push(SettingsIssue::Invalid {
                    name,
                    message: format!(
                        "expected a JSON list of strings such as [\"main\",\"support\"]: {e}"
                    ),
                });
                Vec::new()
            }
        }
    }

    fn number(&mut self, name: &'static str) -> i64 {
        let Some(raw) = self.raw(name) else {
            return 0;
        };
        match raw.trim().parse::<i64>() {
            Ok(value) => value,
            Err(_) => {
                let kind = schema_var(name).map_or("integer", |s| s.kind.label());
                self.issues.push(SettingsIssue::Invalid {
                    name,
                    message: format!("expected an integer ({kind}), got '{raw}'"),
                });
                0
            }
        }
    }
}

impl ServiceSettings {
    pub fn load(dir: &Path) -> Result<Self, SettingsError> {
        Self::from_sources(&EnvSources::load(dir)?)
    }

    pub fn from_sources(sources: &EnvSources) -> Result<Self, SettingsError> {
        let mut c = Collector {
            sources,
            issues: Vec::new(),
        };

        let telegram_bot_token = c.text("TELEGRAM_BOT_TOKEN");
        let db_url = c.text("DB_URL");
        let redis_url = c.text("REDIS_URL");
        let hmac_secret = c.text("HMAC_SECRET");
        let admin_initial_token = c.text("ADMIN_INITIAL_TOKEN");
        let sentry_dsn = c.text("SENTRY_DSN");
        let webhook_base_url = c.url("WEBHOOK_BASE_URL");
        let allowed_admin_roles = c.list("ALLOWED_ADMIN_ROLES");
        let verification_code_ttl_seconds = c.number("VERIFICATION_CODE_TTL");
        let admin_token_ttl_seconds = c.number("ADMIN_TOKEN_TTL");
        let referral_reward_daily_cap = c.number("REFERRAL_REWARD_DAILY_CAP");
        let referral_activity_minutes_required = c.number("REFERRAL_ACTIVITY_MINUTES");

        match (
            telegram_bot_token,
            db_url,
            redis_url,
            hmac_secret,
            admin_initial_token,
        ) {
            (
                Some(telegram_bot_token),
                Some(db_url),
                Some(redis_url),
                Some(hmac_secret),
                Some(admin_initial_token),
            ) if c.issues.is_empty() => Ok(Self {
                telegram_bot_token,
                db_url,
                redis_url,
                hmac_secret,
                admin_initial_token,
                sentry_dsn,
                webhook_base_url,
                allowed_admin_roles,
                verification_code_ttl_seconds,
                admin_token_ttl_seconds,
                referral_reward_daily_cap,
                referral_activity_minutes_required,
            }),
            _ => Err(SettingsError::Invalid(c.issues)),
        }
    }
}

// ============================================================================
// Template lint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateWarning {
    /// A schema variable the template does not mention.
    Undocumented(&'static str),
    /// A template variable the schema does not know.
    Unknown(String),
}

impl fmt::Display for TemplateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateWarning::Undocumented(name) => {
                write!(f, "{name} is part of the service settings but missing from the template")
            }
            TemplateWarning::Unknown(name) => {
                write!(f, "{name} is not a known service setting")
            }
        }
    }
}

#[must_use]
pub fn lint_template(template: &EnvFile) -> Vec<TemplateWarning> {
    let keys = template.keys();
    let mut warnings: Vec<TemplateWarning> = SERVICE_SCHEMA
        .iter()
        .filter(|spec| !keys.iter().any(|key| spec.name.eq_ignore_ascii_case(key)))
        .map(|spec| TemplateWarning::Undocumented(spec.name))
        .collect();
    warnings.extend(
        keys.into_iter()
            .filter(|key| schema_var(key).is_none())
            .map(|key| TemplateWarning::Unknown(key.to_string())),
    );
    warnings
}
