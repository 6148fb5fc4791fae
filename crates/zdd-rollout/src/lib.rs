//! zdd rollout engine — zero-downtime replacement of services behind one
//! reverse proxy on a single host.
//!
//! A rollout starts a replacement for every configured service, waits for
//! each replacement to publish its port, re-renders the proxy config and
//! reloads the proxy, then retires the old processes.
//!
//! # Components
//!
//! - **`poller`** — bounded fixed-interval readiness wait
//! - **`registry`** — pid/port file conventions and pid records
//! - **`process`** — host seam: spawn, liveness, reload signal
//! - **`service`** — start/stop one service, read its published state
//! - **`template`** — single-pass `{placeholder}` substitution
//! - **`proxy`** — render the proxy config and activate it
//! - **`orchestrator`** — the rollout state machine
//! - **`config`** — `deploy.toml` loading
//!
//! # Process contract
//!
//! A service's start command runs with no arguments in its working
//! directory. Once listening, the service writes its pid to its configured
//! pid file and its port to `<pid>.port` next to it. The stop command is run
//! with the pid to stop as its only extra argument.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod process;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod template;

pub use config::{DeployConfig, RolloutSettings, ServiceSpec};
pub use error::{
    ConfigError, ProxyError, ReadinessError, RegistryError, RolloutError, RolloutResult, ServiceError,
};
pub use orchestrator::{Orchestrator, RolloutPhase, RolloutReport, StoppedInstance};
pub use poller::Poller;
pub use process::{CommandLine, Liveness, ProcessHost, SystemHost};
pub use proxy::{Activation, ProxyController, ProxySpec};
pub use service::{RunningInstance, Service, ServiceStatus};
