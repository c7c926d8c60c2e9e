//! Shared subprocess management utilities.

use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, Command};

/// RAII guard that kills a child process (and its process group on Unix, when
/// the child leads one) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` to ensure
/// cleanup if the owning future is cancelled. Call `disarm()` after the process
/// exits normally to prevent the kill.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        self.child.as_mut().expect("child present")
    }

    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                        let _ = child.start_kill();
                    }
                }
            }
            let _ = child.try_wait();
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
    }
}

/// Deliver `signal` to `pid`. A process that already exited is not an error.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: i32) -> io::Result<()> {
    if unsafe { libc::kill(pid as i32, signal) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

/// Whether this process's group is the foreground group of the terminal on
/// stdin. Terminal-generated signals then already reach children that share
/// the group.
#[cfg(unix)]
#[must_use]
pub fn in_terminal_foreground() -> bool {
    let foreground = unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) };
    foreground != -1 && foreground == unsafe { libc::getpgrp() }
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg` in `ChildGuard::drop`. Used for build
/// commands, never for entrypoints.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            // Linux-only: the child dies with kiln (kill -9 / crash).
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}

/// Shell-style exit code: the child's own code, or `128 + signal` when it was
/// killed by a signal.
#[must_use]
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
