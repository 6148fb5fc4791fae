//! Reverse proxy controller — render the config, then reload or spawn.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ConfigError, ProxyError};
use crate::process::{CommandLine, ProcessHost};
use crate::registry;
use crate::template;

/// Suffix every proxy template must carry; stripping it names the rendered file.
pub const TEMPLATE_SUFFIX: &str = ".template";

/// Placeholder for the absolute directory of the rendered config.
pub const CONF_DIR_KEY: &str = "conf_dir";

/// Placeholder for the proxy's own pid file.
pub const PROXY_PID_FILE_KEY: &str = "nginx_pid_file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    template: PathBuf,
    pid_file: PathBuf,
    command: CommandLine,
    config_path: PathBuf,
}

impl ProxySpec {
    /// Validate the template name and derive the rendered config path.
    pub fn new(template: PathBuf, pid_file: PathBuf, command: CommandLine) -> Result<Self, ConfigError> {
        let rendered_name = template
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(TEMPLATE_SUFFIX))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::TemplateSuffix(template.clone()))?;
        let config_path = template.with_file_name(rendered_name);

        Ok(Self {
            template,
            pid_file,
            command,
            config_path,
        })
    }

    pub fn template(&self) -> &Path {
        &self.template
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Where the rendered config is written.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding the rendered config.
    pub fn conf_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or(Path::new("/"))
    }
}

/// How the new config was put into effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A running proxy was sent SIGHUP.
    Reloaded { pid: u32 },
    /// No live proxy was found, so a new one was started.
    Spawned,
}

pub struct ProxyController {
    spec: ProxySpec,
    host: Arc<dyn ProcessHost>,
    verbose: bool,
}

impl ProxyController {
    pub fn new(spec: ProxySpec, host: Arc<dyn ProcessHost>, verbose: bool) -> Self {
        Self { spec, host, verbose }
    }

    pub fn spec(&self) -> &ProxySpec {
        &self.spec
    }

    pub fn read_template(&self) -> Result<String, ProxyError> {
        std::fs::read_to_string(&self.spec.template).map_err(|source| ProxyError::Template {
            path: self.spec.template.clone(),
            source,
        })
    }

    /// The proxy's pid, if its pid file names a live process.
    pub fn read_pid(&self) -> Option<u32> {
        registry::read_pid(&self.spec.pid_file, self.host.as_ref())
    }

    /// Render the template with `ports` plus the derived entries and write it
    /// over the config path. Returns the path written.
    pub fn render_config(&self, ports: &BTreeMap<String, String>) -> Result<&Path, ProxyError> {
        let template_text = self.read_template()?;

        let mut mapping = ports.clone();
        mapping.insert(CONF_DIR_KEY.to_string(), self.spec.conf_dir().display().to_string());
        mapping.insert(
            PROXY_PID_FILE_KEY.to_string(),
            self.spec.pid_file.display().to_string(),
        );

        let rendered = template::render(&template_text, &mapping);
        let path = self.spec.config_path();
        registry::write_atomic(path, rendered.as_bytes()).map_err(|source| ProxyError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), bytes = rendered.len(), "proxy config written");
        Ok(path)
    }

    /// Reload a live proxy, or start one pointed at the rendered config.
    pub fn activate(&self) -> Result<Activation, ProxyError> {
        if let Some(pid) = self.read_pid() {
            info!(pid, "sending SIGHUP to existing proxy process");
            self.host
                .send_reload(pid)
                .map_err(|source| ProxyError::Reload { pid, source })?;
            return Ok(Activation::Reloaded { pid });
        }

        let args = ["-c".to_string(), self.spec.config_path.display().to_string()];
        let cwd = self.spec.conf_dir();
        if self.verbose {
            info!(command = %self.spec.command, ?args, cwd = %cwd.display(), "running");
        }
        info!("spawning new proxy");
        self.host
            .spawn(&self.spec.command, &args, cwd)
            .map_err(|source| ProxyError::Spawn {
                command: self.spec.command.to_string(),
                source,
            })?;
        Ok(Activation::Spawned)
    }
}
