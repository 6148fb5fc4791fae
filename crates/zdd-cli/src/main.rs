//! zdd — zero-downtime deploys behind a reverse proxy.
//!
//! # Usage
//!
//! ```text
//! zdd deploy -c deploy.toml -v
//! zdd status -c deploy.toml --format json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use zdd_rollout::config::DEFAULT_CONFIG_FILE;
use zdd_rollout::{Activation, DeployConfig, Orchestrator, SystemHost};

#[derive(Parser)]
#[command(
    name = "zdd",
    about = "zdd — zero-downtime rollouts behind a reverse proxy",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start new instances of every service, switch the proxy, stop the old ones.
    Deploy {
        /// Deployment config file.
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Log every spawned command.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show pid files, ports and pid records for every service.
    Status {
        /// Deployment config file.
        #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Command::Deploy { verbose: true, .. });
    let default_filter = if verbose { "info,zdd=debug,zdd_rollout=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Command::Deploy { config, verbose } => deploy(&config, verbose).await,
        Command::Status { config, format } => status(&config, &format),
    }
}

fn load_config(path: &Path, subcommand: &str) -> anyhow::Result<DeployConfig> {
    if !path.is_file() {
        missing_config_error(path, subcommand).exit();
    }
    DeployConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Usage error for a missing config, rendered with the subcommand's usage line.
fn missing_config_error(path: &Path, subcommand: &str) -> clap::Error {
    let message = format!("{} not found.", path.display());
    let mut cmd = Cli::command();
    cmd.build();
    if let Some(sub) = cmd.find_subcommand_mut(subcommand) {
        return sub.error(ErrorKind::Io, &message);
    }
    cmd.error(ErrorKind::Io, message)
}

async fn deploy(path: &Path, verbose: bool) -> anyhow::Result<()> {
    let mut config = load_config(path, "deploy")?;
    config.settings.verbose = verbose;

    // Ctrl-C cancels a pending readiness wait or the settle delay; whatever already happened stays.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, abandoning rollout");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut orchestrator =
        Orchestrator::new(config, Arc::new(SystemHost::new())).with_shutdown(shutdown_rx);
    let report = orchestrator.run().await?;

    for instance in &report.instances {
        println!(
            "{}: process {} listening on port {}",
            instance.service, instance.pid, instance.port
        );
    }
    match report.activation {
        Activation::Reloaded { pid } => println!("proxy {pid} reloaded with {}", report.proxy_config.display()),
        Activation::Spawned => println!("proxy started with {}", report.proxy_config.display()),
    }
    for stopped in &report.stopped {
        println!("{}: stopped previous process {}", stopped.service, stopped.pid);
    }
    Ok(())
}

fn status(path: &Path, format: &str) -> anyhow::Result<()> {
    let config = load_config(path, "status")?;
    let orchestrator = Orchestrator::new(config, Arc::new(SystemHost::new()));
    let services = orchestrator.status();

    match format {
        "json" => {
            let out = serde_json::json!({
                "proxy_pid": orchestrator.proxy_pid(),
                "services": services,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        "text" => {
            println!("proxy: {}", display_opt(orchestrator.proxy_pid()));
            for s in &services {
                println!(
                    "{}: pid {} port {} (current record {}, previous record {})",
                    s.service,
                    display_opt(s.pid),
                    display_opt(s.port),
                    display_opt(s.current_record),
                    display_opt(s.previous_record),
                );
            }
        }
        other => anyhow::bail!("unknown output format `{other}` (expected text or json)"),
    }
    Ok(())
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
