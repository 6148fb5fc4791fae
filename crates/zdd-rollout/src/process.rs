//! Operating-system seam — spawning commands, liveness probes, reload signals.
//!
//! The orchestrator never holds child handles. Everything it learns about a
//! process comes from pid files and the null signal, so the whole capability
//! surface fits in the small [`ProcessHost`] trait. [`SystemHost`] is the real
//! implementation; tests substitute a recording fake.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, warn};

/// A configured command: program plus leading arguments, split on whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Split a command string on whitespace. Returns `None` for a blank string.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full argument vector with `extra` appended after the configured arguments.
    pub fn args_with(&self, extra: &[String]) -> Vec<String> {
        self.args.iter().chain(extra).cloned().collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of probing a pid with the null signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists and we may signal it.
    Alive,
    /// The process exists but belongs to another user (EPERM).
    Foreign,
    /// No such process (ESRCH).
    Dead,
}

impl Liveness {
    /// Whether the pid names a running process, regardless of owner.
    pub fn is_running(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Process capabilities the rollout needs from the host.
pub trait ProcessHost: Send + Sync {
    /// Launch `command` with `extra_args` appended, in `cwd`. Fire-and-forget.
    fn spawn(&self, command: &CommandLine, extra_args: &[String], cwd: &Path) -> io::Result<()>;

    /// Probe whether `pid` names a running process.
    fn liveness(&self, pid: u32) -> Liveness;

    /// Ask `pid` to reload its configuration (SIGHUP).
    fn send_reload(&self, pid: u32) -> io::Result<()>;

    /// Convenience wrapper over [`ProcessHost::liveness`].
    fn process_exists(&self, pid: u32) -> bool {
        self.liveness(pid).is_running()
    }
}

/// The real host: tokio child processes and libc signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessHost for SystemHost {
    fn spawn(&self, command: &CommandLine, extra_args: &[String], cwd: &Path) -> io::Result<()> {
        let program = resolve_program(command.program(), cwd);
        let child = tokio::process::Command::new(&program)
            .args(command.args_with(extra_args))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .spawn()?;

        debug!(program = %program.display(), pid = ?child.id(), "spawned");
        // Dropping the handle detaches the child; tokio reaps it in the background.
        drop(child);
        Ok(())
    }

    fn liveness(&self, pid: u32) -> Liveness {
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return Liveness::Dead;
        };
        if raw <= 0 {
            return Liveness::Dead;
        }

        // SAFETY: signal 0 performs permission and existence checks only.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            return Liveness::Alive;
        }

        match io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Liveness::Dead,
            Some(libc::EPERM) => Liveness::Foreign,
            errno => {
                warn!(pid, ?errno, "unexpected liveness probe result, assuming alive");
                Liveness::Alive
            }
        }
    }

    fn send_reload(&self, pid: u32) -> io::Result<()> {
        let raw = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: plain kill(2); the pid was read from the proxy's own pid file.
        let rc = unsafe { libc::kill(raw, libc::SIGHUP) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Relative programs containing a path separator (`./start.sh`) resolve
/// against the working directory they will run in, not ours.
fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && program.contains('/') {
        cwd.join(path)
    } else {
        path.to_path_buf()
    }
}
