//! Rollout orchestrator — drives the rollout state machine.
//!
//! ```text
//! CapturePrevious → Spawn → AwaitReady → SwapProxy → DrainOld → Done
//!                               │
//!                               └──→ Aborted (first readiness timeout)
//! ```
//!
//! Everything runs on one task, one service at a time, in config order.
//! An aborted rollout is not rolled back: new instances keep running, their
//! previous records stay on disk, and the proxy still points at the old
//! instances. The next run picks the old pids up again from the records.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{DeployConfig, RolloutSettings};
use crate::error::{RolloutError, RolloutResult};
use crate::poller::{self, Poller};
use crate::process::ProcessHost;
use crate::proxy::{Activation, ProxyController};
use crate::registry;
use crate::service::{RunningInstance, Service, ServiceStatus};

/// Current phase of a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutPhase {
    /// Not started.
    Pending,
    /// Recording which instances are about to be replaced.
    CapturePrevious,
    /// Launching replacement instances.
    Spawn,
    /// Waiting for each replacement to publish its port.
    AwaitReady,
    /// Rendering and activating the proxy config.
    SwapProxy,
    /// Settling, then stopping the replaced instances.
    DrainOld,
    /// Completed successfully.
    Done,
    /// A replacement never became ready.
    Aborted { service: String },
}

/// An instance that was retired by the rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedInstance {
    pub service: String,
    pub pid: u32,
}

/// Outcome of a successful rollout.
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub instances: Vec<RunningInstance>,
    pub stopped: Vec<StoppedInstance>,
    pub activation: Activation,
    pub proxy_config: PathBuf,
}

pub struct Orchestrator {
    services: Vec<Service>,
    proxy: ProxyController,
    settings: RolloutSettings,
    shutdown: Option<watch::Receiver<bool>>,
    phase: RolloutPhase,
}

impl Orchestrator {
    pub fn new(config: DeployConfig, host: Arc<dyn ProcessHost>) -> Self {
        let verbose = config.settings.verbose;
        let services = config
            .services
            .into_iter()
            .map(|spec| Service::new(spec, host.clone(), verbose))
            .collect();

        Self {
            services,
            proxy: ProxyController::new(config.proxy, host, verbose),
            settings: config.settings,
            shutdown: None,
            phase: RolloutPhase::Pending,
        }
    }

    /// Cancel readiness waits and the settle delay once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn phase(&self) -> &RolloutPhase {
        &self.phase
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Per-service view of pid files and records.
    pub fn status(&self) -> Vec<ServiceStatus> {
        self.services.iter().map(Service::status).collect()
    }

    /// Live pid of the proxy, if any.
    pub fn proxy_pid(&self) -> Option<u32> {
        self.proxy.read_pid()
    }

    /// Run one full rollout.
    pub async fn run(&mut self) -> RolloutResult<RolloutReport> {
        // Fail on an unreadable template before any process is touched.
        self.proxy.read_template()?;

        self.enter(RolloutPhase::CapturePrevious);
        let previous = self.capture_previous()?;

        self.enter(RolloutPhase::Spawn);
        for service in &self.services {
            info!(service = service.name(), "starting new instance");
            service.start()?;
        }

        self.enter(RolloutPhase::AwaitReady);
        let instances = self.await_ready().await?;

        self.enter(RolloutPhase::SwapProxy);
        let ports: BTreeMap<String, String> = instances
            .iter()
            .map(|i| (i.service.clone(), i.port.to_string()))
            .collect();
        let proxy_config = self.proxy.render_config(&ports)?.to_path_buf();
        let activation = self.proxy.activate()?;

        self.enter(RolloutPhase::DrainOld);
        let stopped = self.drain_old(&previous).await?;

        self.enter(RolloutPhase::Done);
        Ok(RolloutReport {
            instances,
            stopped,
            activation,
            proxy_config,
        })
    }

    fn enter(&mut self, phase: RolloutPhase) {
        info!(?phase, "rollout phase");
        self.phase = phase;
    }

    /// Resolve and persist the pid each service is about to replace.
    ///
    /// The live pid file wins; failing that, the current record from an
    /// earlier run. The live pid file is removed so the replacement's own
    /// pid file cannot be mistaken for the old one.
    pub(crate) fn capture_previous(&self) -> RolloutResult<Vec<Option<u32>>> {
        let mut previous = Vec::with_capacity(self.services.len());

        for service in &self.services {
            let pid = service.read_pid().or_else(|| service.read_recorded_pid());

            if let Some(pid) = pid {
                info!(service = service.name(), pid, "recording previous instance");
                registry::write_record(&service.previous_record(), pid)?;
                registry::remove_file(&service.spec().pid_file)?;
            }
            previous.push(pid);
        }

        Ok(previous)
    }

    async fn await_ready(&mut self) -> RolloutResult<Vec<RunningInstance>> {
        let mut poller = Poller::new(self.settings.poll_interval, self.settings.ready_timeout);
        if let Some(shutdown) = &self.shutdown {
            poller = poller.with_shutdown(shutdown.clone());
        }

        let mut instances = Vec::with_capacity(self.services.len());
        let mut failure = None;
        for service in &self.services {
            let description = format!("port file of {}", service.name());
            match poller.wait_for(&description, || service.read_port()).await {
                Ok(instance) => {
                    info!(
                        service = service.name(),
                        pid = instance.pid,
                        port = instance.port,
                        "started successfully"
                    );
                    registry::write_record(&service.current_record(), instance.pid)?;
                    instances.push(instance);
                }
                Err(source) => {
                    failure = Some((service.name().to_string(), source));
                    break;
                }
            }
        }

        if let Some((service, source)) = failure {
            warn!(service = %service, error = %source, "aborting rollout, new instances left running");
            self.enter(RolloutPhase::Aborted {
                service: service.clone(),
            });
            return Err(RolloutError::NotReady { service, source });
        }

        Ok(instances)
    }

    /// Wait for the proxy to settle, then stop every replaced instance.
    ///
    /// A shutdown request during the settle delay returns before any stop
    /// command runs. All stop commands are attempted; the first launch
    /// failure is returned.
    async fn drain_old(&self, previous: &[Option<u32>]) -> RolloutResult<Vec<StoppedInstance>> {
        if poller::sleep_unless_shutdown(self.settings.settle_delay, self.shutdown.clone()).await {
            let pending = self
                .services
                .iter()
                .zip(previous)
                .filter_map(|(service, pid)| pid.map(|pid| format!("{} pid {pid}", service.name())))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(%pending, "interrupted during settle delay, previous instances left running");
            return Err(RolloutError::Interrupted { pending });
        }

        let mut stopped = Vec::new();
        let mut first_error = None;
        for (service, pid) in self.services.iter().zip(previous) {
            let Some(pid) = *pid else { continue };

            info!(service = service.name(), pid, "stopping previous instance");
            match service.stop(pid) {
                Ok(()) => stopped.push(StoppedInstance {
                    service: service.name().to_string(),
                    pid,
                }),
                Err(e) => {
                    warn!(service = service.name(), pid, error = %e, "failed to stop previous instance");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(stopped),
        }
    }
}
