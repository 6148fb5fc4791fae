//! Error types for the rollout engine.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Problems with the deployment file. Always raised before any process is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no [service.<name>] sections in {0}")]
    NoServices(PathBuf),

    #[error("service `{service}`: {message}")]
    Service { service: String, message: String },

    #[error("service name `{0}` is reserved for a derived template placeholder")]
    ReservedName(String),

    #[error("proxy template {0} must end with `.template`")]
    TemplateSuffix(PathBuf),

    #[error("proxy command is empty")]
    EmptyProxyCommand,

    #[error("invalid duration `{value}` for rollout.{key} (expected e.g. `500ms`, `5s`, `2m`, at most 24h)")]
    Duration { key: &'static str, value: String },
}

/// Failure of a bounded readiness wait.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out after {elapsed:?} waiting for {probe}")]
    Timeout { probe: String, elapsed: Duration },

    #[error("cancelled while waiting for {probe}")]
    Cancelled { probe: String },
}

/// Failures launching a service's start or stop command.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service `{service}`: failed to run `{command}`: {source}")]
    SpawnFailed {
        service: String,
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Failures persisting the orchestrator's pid records.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures rendering or activating the proxy configuration.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read proxy template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write proxy config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to send reload signal to proxy process {pid}: {source}")]
    Reload {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn proxy `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Any error that ends a rollout.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "service `{service}` did not become ready: {source}; \
         new processes may still be running and the proxy was not switched"
    )]
    NotReady {
        service: String,
        #[source]
        source: ReadinessError,
    },

    #[error(
        "rollout interrupted before stopping previous instances ({pending}); \
         the proxy already points at the new ones"
    )]
    Interrupted { pending: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}
