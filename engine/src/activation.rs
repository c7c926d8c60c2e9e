//! Launching a committed image's entrypoint.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use kiln_tools::{ChildGuard, exit_code_from_status};
use tokio::process::Command;

use crate::error::LaunchError;
use crate::store::Image;

/// Image directories searched for the program, before the caller's `PATH`.
pub const IMAGE_BIN_DIRS: [&str; 3] = ["usr/local/bin", "usr/bin", "bin"];

/// Everything needed to start one entrypoint process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub image: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Set on top of the inherited environment.
    pub env: BTreeMap<String, OsString>,
}

impl LaunchPlan {
    /// Resolve `command` (or the declared entrypoint) against `image`.
    pub fn new(image: &Image, command: Option<&str>) -> Result<Self, LaunchError> {
        let argv = image
            .record
            .command(command)
            .ok_or_else(|| LaunchError::UnknownCommand {
                image: image.name().to_string(),
                name: command.unwrap_or_default().to_string(),
            })?;
        let rootfs = image.rootfs();
        let cwd = image.workdir();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| LaunchError::UnknownCommand {
                image: image.name().to_string(),
                name: command.unwrap_or_default().to_string(),
            })?;
        let program = resolve_program(&rootfs, &cwd, program).ok_or_else(|| {
            LaunchError::ProgramNotFound {
                image: image.name().to_string(),
                program: program.clone(),
            }
        })?;

        let root = rootfs.to_string_lossy().into_owned();
        let mut env: BTreeMap<String, OsString> = image
            .record
            .entrypoint
            .env()
            .iter()
            .map(|(k, v)| (k.clone(), OsString::from(v.replace("{root}", &root))))
            .collect();
        env.insert("KILN_IMAGE".into(), image.name().into());
        env.insert("KILN_ROOT".into(), rootfs.clone().into_os_string());
        if let Some(path) = image_path_var(&rootfs, env.get("PATH").cloned()) {
            env.insert("PATH".into(), path);
        }

        Ok(Self {
            image: image.name().to_string(),
            program,
            args: args.to_vec(),
            cwd,
            env,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

fn resolve_program(rootfs: &Path, cwd: &Path, program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = match program.strip_prefix('/') {
            Some(inside) => rootfs.join(inside),
            None => cwd.join(program),
        };
        return path.is_file().then_some(path);
    }
    IMAGE_BIN_DIRS
        .iter()
        .map(|dir| rootfs.join(dir).join(program))
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which(program).ok())
}

/// Image bin dirs, then the entrypoint's own `PATH` if it set one, else the caller's.
fn image_path_var(rootfs: &Path, declared: Option<OsString>) -> Option<OsString> {
    let tail = declared.or_else(|| env::var_os("PATH")).unwrap_or_default();
    let dirs = IMAGE_BIN_DIRS
        .iter()
        .map(|dir| rootfs.join(dir))
        .chain(env::split_paths(&tail));
    match env::join_paths(dirs) {
        Ok(joined) => Some(joined),
        Err(e) => {
            tracing::warn!("Leaving PATH unchanged: {e}");
            None
        }
    }
}

/// Run the entrypoint in the foreground and return the exit code `kiln run`
/// should exit with.
///
/// The child stays in the caller's process group and session. SIGINT, SIGTERM
/// and SIGHUP sent to kiln are passed on to it and kiln keeps waiting, so the
/// code is always the child's own (`128 + signal` if a signal killed it). A
/// non-zero exit is not an error.
pub async fn launch(image: &Image, command: Option<&str>) -> Result<i32, LaunchError> {
    let plan = LaunchPlan::new(image, command)?;
    run(&plan).await
}

pub async fn run(plan: &LaunchPlan) -> Result<i32, LaunchError> {
    let program_name = plan.program.display().to_string();
    // Handlers go in before the spawn so an early signal cannot kill kiln alone.
    let mut forwarder = SignalForwarder::install().map_err(|source| LaunchError::Spawn {
        program: program_name.clone(),
        source,
    })?;

    tracing::info!(
        image = %plan.image,
        program = %program_name,
        args = ?plan.args,
        cwd = %plan.cwd.display(),
        "Launching entrypoint"
    );
    let child = plan.command().spawn().map_err(|source| LaunchError::Spawn {
        program: program_name.clone(),
        source,
    })?;
    let mut guard = ChildGuard::new(child);
    let status = forwarder.wait(&mut guard).await;
    guard.disarm();

    let status = status.map_err(|source| LaunchError::Wait {
        program: program_name,
        source,
    })?;
    let code = exit_code_from_status(status);
    tracing::info!(image = %plan.image, code, "Entrypoint exited");
    Ok(code)
}

#[cfg(unix)]
struct SignalForwarder {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalForwarder {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(&mut self, guard: &mut ChildGuard) -> io::Result<ExitStatus> {
        let pid = guard.id();
        loop {
            let signal = tokio::select! {
                status = guard.child_mut().wait() => return status,
                Some(()) = self.interrupt.recv() => {
                    // Ctrl-C at the terminal already reached the child.
                    if kiln_tools::in_terminal_foreground() {
                        tracing::debug!("Interrupt delivered by the terminal");
                        continue;
                    }
                    libc::SIGINT
                }
                Some(()) = self.terminate.recv() => libc::SIGTERM,
                Some(()) = self.hangup.recv() => libc::SIGHUP,
            };
            let Some(pid) = pid else {
                continue;
            };
            tracing::info!(pid, signal, "Forwarding signal to entrypoint");
            if let Err(e) = kiln_tools::send_signal(pid, signal) {
                tracing::warn!(pid, signal, "Failed to forward signal: {e}");
            }
        }
    }
}

#[cfg(not(unix))]
struct SignalForwarder;

#[cfg(not(unix))]
impl SignalForwarder {
    #[allow(clippy::unnecessary_wraps)]
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn wait(&mut self, guard: &mut ChildGuard) -> io::Result<ExitStatus> {
        guard.child_mut().wait().await
    }
}
