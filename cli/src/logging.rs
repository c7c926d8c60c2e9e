//! Tracing setup: a log file under the kiln home, falling back to stderr.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the tracing filter.
pub const LOG_ENV: &str = "KILN_LOG";

/// `KILN_LOG`, then the configured filter, then `info`.
pub fn init_tracing(configured: Option<&str>) {
    let env_filter = env::var(LOG_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| configured.and_then(|raw| EnvFilter::try_new(raw).ok()))
        .or_else(|| EnvFilter::try_new("info").ok())
        .unwrap_or_else(EnvFilter::default);

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.kiln/logs/kiln.log
    if let Some(home) = kiln_config::kiln_home() {
        candidates.push(home.join("logs").join("kiln.log"));
    }

    // Fallback: ./.kiln/logs/kiln.log
    candidates.push(PathBuf::from(".kiln").join("logs").join("kiln.log"));

    candidates
}
