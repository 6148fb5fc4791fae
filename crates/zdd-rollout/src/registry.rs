//! Pid and port file conventions.
//!
//! A service publishes itself by writing its pid to its configured pid file
//! and its listening port to `<pid>.port` in the same directory. The
//! orchestrator keeps its own bookkeeping next to the pid file:
//!
//! ```text
//! web.pid            written by the service
//! 4242.port          written by the service
//! web.current.pid    last instance the orchestrator saw become ready
//! web.previous.pid   instance being replaced by the in-flight rollout
//! ```

use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::process::{Liveness, ProcessHost};

/// `web.pid` → `web.current.pid`.
pub fn current_record_path(pid_file: &Path) -> PathBuf {
    record_path(pid_file, "current")
}

/// `web.pid` → `web.previous.pid`.
pub fn previous_record_path(pid_file: &Path) -> PathBuf {
    record_path(pid_file, "previous")
}

/// Insert `.{tag}` before the extension; files without one get `.{tag}.pid`.
fn record_path(pid_file: &Path, tag: &str) -> PathBuf {
    let stem = pid_file.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(".");
    name.push(tag);
    name.push(".");
    name.push(pid_file.extension().unwrap_or(OsStr::new("pid")));
    pid_file.with_file_name(name)
}

/// The port file a service with `pid` publishes beside `pid_file`.
pub fn port_file_path(pid_file: &Path, pid: u32) -> PathBuf {
    pid_file.with_file_name(format!("{pid}.port"))
}

/// Read a decimal integer, ignoring surrounding whitespace.
///
/// Missing or unreadable files and unparsable content all read as `None`.
pub fn read_int_file(path: &Path) -> Option<i64> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "unreadable integer file");
            }
            return None;
        }
    };

    match content.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(path = %path.display(), "integer file has unparsable content");
            None
        }
    }
}

/// Read a pid file and keep the pid only if it names a running process.
pub fn read_pid(path: &Path, host: &dyn ProcessHost) -> Option<u32> {
    let pid = read_int_file(path).and_then(|raw| u32::try_from(raw).ok())?;
    if pid == 0 {
        return None;
    }

    match host.liveness(pid) {
        Liveness::Alive => Some(pid),
        Liveness::Foreign => {
            warn!(
                pid,
                path = %path.display(),
                "pid belongs to another user, treating it as running"
            );
            Some(pid)
        }
        Liveness::Dead => {
            debug!(pid, path = %path.display(), "stale pid file");
            None
        }
    }
}

/// Read the port published by `pid` beside `pid_file`.
pub fn read_port(pid_file: &Path, pid: u32) -> Option<u16> {
    let raw = read_int_file(&port_file_path(pid_file, pid))?;
    u16::try_from(raw).ok().filter(|port| *port != 0)
}

/// Persist `pid` as plain decimal text.
pub fn write_record(path: &Path, pid: u32) -> Result<(), RegistryError> {
    write_atomic(path, pid.to_string().as_bytes()).map_err(|source| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(pid, path = %path.display(), "pid record written");
    Ok(())
}

/// Delete a file; a file that is already gone is not an error.
pub fn remove_file(path: &Path) -> Result<(), RegistryError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RegistryError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `contents` to a temporary sibling, sync it, and rename it over `path`.
///
/// Readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}
