//! `deploy.toml` loader.
//!
//! ```toml
//! [service.web]
//! start = "./start.sh"
//! stop = "./stop.sh"
//! pid_file = "web.pid"
//!
//! [nginx]
//! template = "nginx.conf.template"
//! pid_file = "nginx.pid"
//! ```
//!
//! Services roll out in file order. Relative paths resolve against the
//! directory holding the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT, MIN_POLL_INTERVAL};
use crate::process::CommandLine;
use crate::proxy::{CONF_DIR_KEY, PROXY_PID_FILE_KEY, ProxySpec};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "./deploy.toml";

/// Default pause between proxy activation and stopping old instances.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for every `[rollout]` duration.
pub const MAX_ROLLOUT_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// One deployable service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub start: CommandLine,
    pub stop: CommandLine,
    pub cwd: PathBuf,
    pub pid_file: PathBuf,
}

/// Timing and verbosity knobs for one rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutSettings {
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    /// Log every spawned command line at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            verbose: false,
        }
    }
}

/// Everything a rollout needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub config_dir: PathBuf,
    pub services: Vec<ServiceSpec>,
    pub proxy: ProxySpec,
    pub settings: RolloutSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    service: toml::Table,
    nginx: RawProxy,
    #[serde(default)]
    rollout: RawRollout,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    start: String,
    stop: String,
    pid_file: PathBuf,
    cwd: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProxy {
    template: PathBuf,
    pid_file: PathBuf,
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRollout {
    ready_timeout: Option<String>,
    poll_interval: Option<String>,
    settle_delay: Option<String>,
}

impl DeployConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let absolute = std::path::absolute(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        Self::from_str_in(&content, &config_dir).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            ConfigError::NoServices(_) => ConfigError::NoServices(path.to_path_buf()),
            other => other,
        })
    }

    /// Parse config text, resolving relative paths against `config_dir`.
    pub fn from_str_in(content: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: config_dir.to_path_buf(),
            message: e.message().to_string(),
        })?;

        let mut services = Vec::with_capacity(raw.service.len());
        for (name, value) in raw.service {
            if name == CONF_DIR_KEY || name == PROXY_PID_FILE_KEY {
                return Err(ConfigError::ReservedName(name));
            }
            let section: RawService = value.try_into().map_err(|e: toml::de::Error| {
                ConfigError::Service {
                    service: name.clone(),
                    message: e.message().to_string(),
                }
            })?;
            services.push(build_service(name, section, config_dir)?);
        }
        if services.is_empty() {
            return Err(ConfigError::NoServices(config_dir.to_path_buf()));
        }

        let command = raw.nginx.command.as_deref().unwrap_or("nginx");
        let proxy = ProxySpec::new(
            config_dir.join(raw.nginx.template),
            config_dir.join(raw.nginx.pid_file),
            CommandLine::parse(command).ok_or(ConfigError::EmptyProxyCommand)?,
        )?;

        let settings = RolloutSettings {
            ready_timeout: duration_or("ready_timeout", raw.rollout.ready_timeout, DEFAULT_READY_TIMEOUT, Duration::ZERO)?,
            poll_interval: duration_or("poll_interval", raw.rollout.poll_interval, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL)?,
            settle_delay: duration_or("settle_delay", raw.rollout.settle_delay, DEFAULT_SETTLE_DELAY, Duration::ZERO)?,
            verbose: false,
        };

        debug!(
            services = services.len(),
            config_dir = %config_dir.display(),
            "deploy config loaded"
        );

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            services,
            proxy,
            settings,
        })
    }
}

fn build_service(name: String, raw: RawService, config_dir: &Path) -> Result<ServiceSpec, ConfigError> {
    let command = |key: &str, value: &str| {
        CommandLine::parse(value).ok_or_else(|| ConfigError::Service {
            service: name.clone(),
            message: format!("`{key}` command is empty"),
        })
    };
    let start = command("start", &raw.start)?;
    let stop = command("stop", &raw.stop)?;

    Ok(ServiceSpec {
        start,
        stop,
        cwd: raw
            .cwd
            .map(|cwd| config_dir.join(cwd))
            .unwrap_or_else(|| config_dir.to_path_buf()),
        pid_file: config_dir.join(raw.pid_file),
        name,
    })
}

/// Parse an optional duration and require it to lie in `min..=MAX_ROLLOUT_DURATION`.
fn duration_or(
    key: &'static str,
    value: Option<String>,
    default: Duration,
    min: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else { return Ok(default) };
    match parse_duration(&value) {
        Some(d) if (min..=MAX_ROLLOUT_DURATION).contains(&d) => Ok(d),
        _ => Err(ConfigError::Duration { key, value }),
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
[service.web]
start = "./start.sh"
stop = "./stop.sh"
pid_file = "web.pid"

[service.api]
start = "bin/api --workers 2"
stop = "bin/api-stop"
pid_file = "run/api.pid"
cwd = "api"

[nginx]
template = "nginx.conf.template"
pid_file = "nginx.pid"
"#;

    #[test]
    fn services_keep_file_order() {
        let config = DeployConfig::from_str_in(BASIC, Path::new("/srv/app")).unwrap();
        let names: Vec<_> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["web", "api"]);
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let config = DeployConfig::from_str_in(BASIC, Path::new("/srv/app")).unwrap();
        let web = &config.services[0];
        assert_eq!(web.pid_file, Path::new("/srv/app/web.pid"));
        assert_eq!(web.cwd, Path::new("/srv/app"));

        let api = &config.services[1];
        assert_eq!(api.pid_file, Path::new("/srv/app/run/api.pid"));
        assert_eq!(api.cwd, Path::new("/srv/app/api"));
        assert_eq!(api.start.program(), "bin/api");
        assert_eq!(api.start.args(), ["--workers", "2"]);

        assert_eq!(config.proxy.template(), Path::new("/srv/app/nginx.conf.template"));
        assert_eq!(config.proxy.config_path(), Path::new("/srv/app/nginx.conf"));
        assert_eq!(config.proxy.command().program(), "nginx");
    }

    #[test]
    fn default_settings() {
        let config = DeployConfig::from_str_in(BASIC, Path::new("/srv/app")).unwrap();
        assert_eq!(config.settings, RolloutSettings::default());
        assert_eq!(config.settings.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.settings.poll_interval, Duration::from_millis(100));
        assert_eq!(config.settings.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn rollout_section_overrides_timing() {
        let text = format!("{BASIC}\n[rollout]\nready_timeout = \"2m\"\nsettle_delay = \"250ms\"\n");
        let config = DeployConfig::from_str_in(&text, Path::new("/srv/app")).unwrap();
        assert_eq!(config.settings.ready_timeout, Duration::from_secs(120));
        assert_eq!(config.settings.settle_delay, Duration::from_millis(250));
        assert_eq!(config.settings.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let text = format!("{BASIC}\n[rollout]\nsettle_delay = \"soon\"\n");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::Duration { key: "settle_delay", .. }));
    }

    #[test]
    fn template_without_suffix_is_rejected() {
        let text = BASIC.replace("nginx.conf.template", "nginx.conf");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateSuffix(_)));
    }

    #[test]
    fn missing_key_names_the_service() {
        let text = BASIC.replace("stop = \"./stop.sh\"\n", "");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        match err {
            ConfigError::Service { service, message } => {
                assert_eq!(service, "web");
                assert!(message.contains("stop"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_proxy_section_is_a_parse_error() {
        let text = BASIC.split("[nginx]").next().unwrap();
        let err = DeployConfig::from_str_in(text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn no_services_is_rejected() {
        let text = "[nginx]\ntemplate = \"n.conf.template\"\npid_file = \"n.pid\"\n";
        let err = DeployConfig::from_str_in(text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::NoServices(_)));
    }

    #[test]
    fn empty_command_is_rejected() {
        let text = BASIC.replace("\"./start.sh\"", "\"  \"");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::Service { .. }));
    }

    #[test]
    fn reserved_service_name_is_rejected() {
        let text = BASIC.replace("[service.web]", "[service.conf_dir]");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName(name) if name == "conf_dir"));
    }

    #[test]
    fn from_file_uses_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, BASIC).unwrap();

        let config = DeployConfig::from_file(&path).unwrap();
        assert_eq!(config.config_dir, dir.path());
        assert_eq!(config.services[0].pid_file, dir.path().join("web.pid"));
    }

    #[test]
    fn from_file_missing() {
        let err = DeployConfig::from_file(Path::new("/nonexistent/deploy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn parse_duration_rejects_minute_overflow() {
        assert_eq!(parse_duration("307445734561825861m"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for (key, value) in [
            ("ready_timeout", "18446744073709551615"),
            ("settle_delay", "307445734561825861m"),
            ("ready_timeout", "90000"),
            ("ready_timeout", "1441m"),
        ] {
            let text = format!("{BASIC}\n[rollout]\n{key} = \"{value}\"\n");
            let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Duration { key: k, .. } if *k == key),
                "{key} = {value}: {err:?}"
            );
        }
    }

    #[test]
    fn largest_allowed_duration_loads() {
        let text = format!("{BASIC}\n[rollout]\nready_timeout = \"1440m\"\n");
        let config = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap();
        assert_eq!(config.settings.ready_timeout, MAX_ROLLOUT_DURATION);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let text = format!("{BASIC}\n[rollout]\npoll_interval = \"0ms\"\n");
        let err = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, ConfigError::Duration { key: "poll_interval", .. }));
    }

    #[test]
    fn zero_settle_delay_is_allowed() {
        let text = format!("{BASIC}\n[rollout]\nsettle_delay = \"0s\"\n");
        let config = DeployConfig::from_str_in(&text, Path::new("/srv")).unwrap();
        assert_eq!(config.settings.settle_delay, Duration::ZERO);
    }
}
