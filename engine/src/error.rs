use std::fmt;
use std::io;
use std::path::PathBuf;

use kiln_config::ConfigError;
use kiln_tools::CommandError;
use kiln_types::Step;
use thiserror::Error;

/// Why a build stopped. Nothing is retried; every variant is fatal.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Unknown runtime tag, unknown system package, or unsatisfiable dependencies.
    #[error("{0}")]
    Resolution(String),
    #[error("missing build input '{}'", path.display())]
    MissingInput { path: PathBuf },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("command exited with code {exit_code}: {command}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        /// Redacted.
        stderr: String,
    },
    #[error("step {step} requires {requires} to have completed")]
    StepOrder { step: Step, requires: Step },
    #[error("build context changed during the build ({expected} -> {actual})")]
    ContextChanged { expected: String, actual: String },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BuildError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BuildError::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-friendly kind, used in logs and build events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Resolution(_) => "resolution",
            BuildError::MissingInput { .. } => "missing-input",
            BuildError::Io { .. } => "io",
            BuildError::CommandFailed { .. } => "command-failed",
            BuildError::StepOrder { .. } => "step-order",
            BuildError::ContextChanged { .. } => "context-changed",
            BuildError::Command(_) => "command",
            BuildError::Config(_) => "config",
            BuildError::Store(_) => "store",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

/// A failed build: the error plus where in the pipeline it happened.
#[derive(Debug)]
pub struct BuildFailure {
    /// `None` when the build failed before the first step or at commit.
    pub step: Option<Step>,
    /// Steps that completed before the failure, in order.
    pub completed: Vec<Step>,
    pub error: BuildError,
}

impl BuildFailure {
    #[must_use]
    pub fn before_steps(error: BuildError) -> Self {
        Self {
            step: None,
            completed: Vec::new(),
            error,
        }
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(
                f,
                "build failed at step {} ({step}): {}",
                step.number(),
                self.error
            ),
            None => write!(f, "build failed: {}", self.error),
        }
    }
}

impl std::error::Error for BuildFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no image named '{0}'")]
    NotFound(String),
    #[error("image '{name}' is corrupt: {message}")]
    Corrupt { name: String, message: String },
    #[error("invalid image name '{0}'")]
    InvalidName(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("image '{image}' has no command named '{name}'")]
    UnknownCommand { image: String, name: String },
    #[error("program '{program}' not found in image '{image}' or on PATH")]
    ProgramNotFound { image: String, program: String },
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use kiln_types::Step;

    use super::{BuildError, BuildFailure};

    #[test]
    fn failure_names_the_step() {
        let failure = BuildFailure {
            step: Some(Step::InstallDependencies),
            completed: vec![Step::SelectBase],
            error: BuildError::Resolution("no version of 'y' satisfies ==999.0".into()),
        };
        assert_eq!(
            failure.to_string(),
            "build failed at step 5 (install-dependencies): no version of 'y' satisfies ==999.0"
        );
    }

    #[test]
    fn command_failure_includes_stderr() {
        let err = BuildError::CommandFailed {
            command: "apt-get update".into(),
            exit_code: 100,
            stderr: "E: network unreachable\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "command exited with code 100: apt-get update\nE: network unreachable"
        );
        assert_eq!(err.kind(), "command-failed");

        let missing = BuildError::MissingInput {
            path: PathBuf::from("requirements.txt"),
        };
        assert_eq!(missing.to_string(), "missing build input 'requirements.txt'");
    }
}
