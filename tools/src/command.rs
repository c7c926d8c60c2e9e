//! Templated shell commands for the command backend.

use std::io;
use std::path::Path;
use std::process::Stdio;

use kiln_utils::env_redactor;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::process::{ChildGuard, exit_code_from_status, set_new_session};
use crate::shell::{DetectedShell, shell_quote};

/// Per-stream capture limit.
pub const MAX_CAPTURED_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown placeholder '{{{name}}}' in command template '{template}'")]
    UnknownPlaceholder { template: String, name: String },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// A value substituted into a command template.
#[derive(Debug, Clone, Copy)]
pub enum Placeholder<'a> {
    /// Quoted as a single shell word.
    Word(&'a str),
    /// Each item quoted, joined with spaces.
    Words(&'a [String]),
}

/// Substitute `{name}` placeholders.
///
/// Only identifier-shaped braces are placeholders, so `awk '{print $1}'` and
/// `${VAR}` pass through untouched. An identifier without a binding is an error.
pub fn render_template(
    template: &str,
    vars: &[(&str, Placeholder<'_>)],
) -> Result<String, CommandError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        let name = close.map(|end| &after[..end]);
        let preceded_by_dollar = out.ends_with('$');
        match name {
            Some(name) if is_placeholder_name(name) && !preceded_by_dollar => {
                let value = vars
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| CommandError::UnknownPlaceholder {
                        template: template.to_string(),
                        name: name.to_string(),
                    })?;
                match value {
                    Placeholder::Word(word) => out.push_str(&shell_quote(word)),
                    Placeholder::Words(words) => out.push_str(
                        &words
                            .iter()
                            .map(|w| shell_quote(w))
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                }
                rest = &after[name.len() + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    /// Secrets from the environment are already redacted.
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs rendered command lines through the detected shell.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: DetectedShell,
}

impl CommandRunner {
    #[must_use]
    pub fn new(shell: DetectedShell) -> Self {
        Self { shell }
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    /// Run one command line to completion, capturing its output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::exit_code`], not as an
    /// error. Dropping the future kills the command's process group.
    pub async fn run(&self, line: &str, cwd: &Path) -> Result<CommandOutput, CommandError> {
        tracing::debug!(shell = %self.shell, command = line, "Running command");

        let mut command = Command::new(&self.shell.binary);
        command
            .args(&self.shell.args)
            .arg(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(cwd);
        set_new_session(&mut command);

        let child = command.spawn().map_err(|source| CommandError::Spawn {
            command: line.to_string(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);

        let stdout = guard.child_mut().stdout.take();
        let stderr = guard.child_mut().stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout, MAX_CAPTURED_BYTES));
        let stderr_task = tokio::spawn(read_capped(stderr, MAX_CAPTURED_BYTES));

        let status = guard
            .child_mut()
            .wait()
            .await
            .map_err(|source| CommandError::Wait {
                command: line.to_string(),
                source,
            })?;
        guard.disarm();

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = exit_code_from_status(status);
        tracing::debug!(command = line, exit_code, "Command finished");

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr: env_redactor().redact(&stderr).into_owned(),
        })
    }
}

async fn read_capped<R: AsyncRead + Unpin + Send + 'static>(
    reader: Option<R>,
    max_collect: usize,
) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = [0u8; 4096];
    let mut collected: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if collected.len() < max_collect {
            let take = (max_collect - collected.len()).min(n);
            collected.extend_from_slice(&buf[..take]);
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
