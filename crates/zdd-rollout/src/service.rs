//! Single-service lifecycle — start, stop and self-published state.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ServiceSpec;
use crate::error::ServiceError;
use crate::process::{CommandLine, ProcessHost};
use crate::registry;

/// A freshly observed, reachable instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningInstance {
    pub service: String,
    pub pid: u32,
    pub port: u16,
}

/// Point-in-time view of a service's files, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    /// Live pid from the service's own pid file.
    pub pid: Option<u32>,
    /// Port published by that pid.
    pub port: Option<u16>,
    /// Raw content of the current record, live or not.
    pub current_record: Option<i64>,
    /// Raw content of the previous record, live or not.
    pub previous_record: Option<i64>,
}

pub struct Service {
    spec: ServiceSpec,
    host: Arc<dyn ProcessHost>,
    verbose: bool,
}

impl Service {
    pub fn new(spec: ServiceSpec, host: Arc<dyn ProcessHost>, verbose: bool) -> Self {
        Self { spec, host, verbose }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn current_record(&self) -> PathBuf {
        registry::current_record_path(&self.spec.pid_file)
    }

    pub fn previous_record(&self) -> PathBuf {
        registry::previous_record_path(&self.spec.pid_file)
    }

    /// Launch the start command. The new process announces itself through
    /// its pid file and port file; nothing is captured here.
    pub fn start(&self) -> Result<(), ServiceError> {
        self.run(&self.spec.start, &[])
    }

    /// Run the stop command with `pid` as its only extra argument.
    pub fn stop(&self, pid: u32) -> Result<(), ServiceError> {
        self.run(&self.spec.stop, &[pid.to_string()])
    }

    /// Live pid from the service's own pid file.
    pub fn read_pid(&self) -> Option<u32> {
        registry::read_pid(&self.spec.pid_file, self.host.as_ref())
    }

    /// Live pid from the orchestrator's current record.
    pub fn read_recorded_pid(&self) -> Option<u32> {
        registry::read_pid(&self.current_record(), self.host.as_ref())
    }

    /// Readiness probe: a live pid that has published its port.
    pub fn read_port(&self) -> Option<RunningInstance> {
        let pid = self.read_pid()?;
        let port = registry::read_port(&self.spec.pid_file, pid)?;
        Some(RunningInstance {
            service: self.spec.name.clone(),
            pid,
            port,
        })
    }

    pub fn status(&self) -> ServiceStatus {
        let pid = self.read_pid();
        ServiceStatus {
            service: self.spec.name.clone(),
            pid,
            port: pid.and_then(|pid| registry::read_port(&self.spec.pid_file, pid)),
            current_record: registry::read_int_file(&self.current_record()),
            previous_record: registry::read_int_file(&self.previous_record()),
        }
    }

    fn run(&self, command: &CommandLine, extra: &[String]) -> Result<(), ServiceError> {
        if self.verbose {
            info!(
                service = %self.spec.name,
                command = %command,
                ?extra,
                cwd = %self.spec.cwd.display(),
                "running"
            );
        } else {
            debug!(service = %self.spec.name, command = %command, ?extra, "running");
        }

        self.host
            .spawn(command, extra, &self.spec.cwd)
            .map_err(|source| ServiceError::SpawnFailed {
                service: self.spec.name.clone(),
                command: command.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::process::Liveness;
    use crate::process::fake::{Behavior, FakeHost, HostEvent};

    fn spec_in(dir: &Path) -> ServiceSpec {
        ServiceSpec {
            name: "web".to_string(),
            start: CommandLine::parse("./start.sh").unwrap(),
            stop: CommandLine::parse("./stop.sh --graceful").unwrap(),
            cwd: dir.to_path_buf(),
            pid_file: dir.join("web.pid"),
        }
    }

    #[test]
    fn start_runs_without_arguments_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        host.on_spawn("./start.sh", Behavior::Silent);

        Service::new(spec_in(dir.path()), host.clone(), false).start().unwrap();

        match &host.events()[..] {
            [HostEvent::Spawn { program, args, cwd, .. }] => {
                assert_eq!(program, "./start.sh");
                assert!(args.is_empty());
                assert_eq!(cwd, dir.path());
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn stop_appends_pid() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        host.on_spawn("./stop.sh", Behavior::Terminate);

        Service::new(spec_in(dir.path()), host.clone(), true).stop(4242).unwrap();
        assert_eq!(host.spawns_of("./stop.sh"), vec![vec!["--graceful", "4242"]]);
    }

    #[test]
    fn spawn_failure_names_service_and_command() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::new(spec_in(dir.path()), Arc::new(FakeHost::new()), false);
        let err = service.start().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`web`"), "{message}");
        assert!(message.contains("./start.sh"), "{message}");
    }

    #[test]
    fn read_port_requires_live_pid_and_port_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        let service = Service::new(spec_in(dir.path()), host.clone(), false);
        assert_eq!(service.read_port(), None);

        std::fs::write(dir.path().join("web.pid"), "55\n").unwrap();
        assert_eq!(service.read_port(), None, "pid not running");

        host.set_liveness(55, Liveness::Alive);
        assert_eq!(service.read_port(), None, "no port file yet");

        std::fs::write(dir.path().join("55.port"), "8123\n").unwrap();
        assert_eq!(
            service.read_port(),
            Some(RunningInstance {
                service: "web".to_string(),
                pid: 55,
                port: 8123,
            })
        );
    }

    #[test]
    fn status_reports_raw_records() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        host.set_liveness(56, Liveness::Alive);
        std::fs::write(dir.path().join("web.pid"), "56").unwrap();
        std::fs::write(dir.path().join("56.port"), "9000").unwrap();
        std::fs::write(dir.path().join("web.current.pid"), "56").unwrap();
        std::fs::write(dir.path().join("web.previous.pid"), "12").unwrap();

        let status = Service::new(spec_in(dir.path()), host, false).status();
        assert_eq!(
            status,
            ServiceStatus {
                service: "web".to_string(),
                pid: Some(56),
                port: Some(9000),
                current_record: Some(56),
                previous_record: Some(12),
            }
        );
    }
}
