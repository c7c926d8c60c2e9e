//! Subprocess plumbing for Kiln: process groups, shell detection and the
//! templated command runner used by the command backend.

pub mod command;
pub mod process;
pub mod shell;

pub use command::{
    CommandError, CommandOutput, CommandRunner, MAX_CAPTURED_BYTES, Placeholder, render_template,
};
pub use process::{ChildGuard, exit_code_from_status, set_new_session};
#[cfg(unix)]
pub use process::{in_terminal_foreground, send_signal};
pub use shell::{DetectedShell, detect_shell, shell_quote};
