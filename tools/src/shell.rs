//! Shell detection and quoting for templated commands.

use std::fmt;
use std::path::{Path, PathBuf};

use kiln_config::ShellConfig;

/// Detected shell for command execution.
#[derive(Debug, Clone)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command (e.g., `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Detect the shell used for backend commands.
///
/// Priority:
/// - Config override (if set)
/// - `bash` on `PATH`
/// - `/bin/sh`
///
/// `$SHELL` is not consulted; templates are POSIX shell.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}

/// Infer default args for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    let name = Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        _ => vec!["-c".to_string()],
    }
}

/// Quote a value for a POSIX shell. Plain words are returned unchanged.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '=' | ','));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
