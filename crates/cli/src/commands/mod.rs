//! CLI command definitions and execution
//!
//! Every command takes location URLs: bare paths and `file://` URLs for local
//! disk, `scp://[user@]host[:port]/path` for SSH hosts, and
//! `tar:<url>[!<path>]` for members of an archive stored on either.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use afs_core::{Config, ConfigManager, Manager, Options, SshSettings, Timeout, registry};
use afs_scp::{Profiles, SshConfig};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod cat;
pub mod cp;
mod host;
mod ls;
mod mkdir;
mod rm;

/// afs - unified storage access
///
/// One set of commands for local disk, SSH hosts (SCP) and tar archives.
#[derive(Parser, Debug)]
#[command(name = "afs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    /// SSH user for hosts without a profile
    #[arg(long, global = true, env = "AFS_SSH_USER")]
    pub user: Option<String>,

    /// SSH password for hosts without a profile
    #[arg(long, global = true, env = "AFS_SSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SSH private key for hosts without a profile
    #[arg(short = 'i', long, global = true)]
    pub identity: Option<PathBuf>,

    /// Session timeout in seconds (overrides the config file)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage SSH host profiles
    #[command(subcommand)]
    Host(host::HostCommands),

    /// List entries at and beneath a location
    Ls(ls::LsArgs),

    /// Print file contents
    Cat(cat::CatArgs),

    /// Copy files and directory trees between locations
    Cp(cp::CpArgs),

    /// Remove files or directory trees
    Rm(rm::RmArgs),

    /// Create directories
    Mkdir(mkdir::MkdirArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            Formatter::default().error(&format!("{e:#}"));
            return ExitCode::from(&e);
        }
    };

    let formatter = Formatter::new(OutputConfig::resolve(
        cli.json,
        cli.no_color,
        cli.quiet,
        &config.output,
    ));

    if let Err(e) = register_backends(&cli, &config) {
        formatter.error(&format!("{e:#}"));
        return ExitCode::from(&e);
    }

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Host(cmd) => host::execute(cmd, &formatter),
        Commands::Ls(args) => ls::execute(&ctx, args, &formatter).await,
        Commands::Cat(args) => cat::execute(&ctx, args, &formatter).await,
        Commands::Cp(args) => cp::execute(&ctx, args, &formatter).await,
        Commands::Rm(args) => rm::execute(&ctx, args, &formatter).await,
        Commands::Mkdir(args) => mkdir::execute(&ctx, args, &formatter).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let manager = ConfigManager::new()?;
    let config = manager
        .load()
        .with_context(|| format!("loading {}", manager.config_path().display()))?;
    Ok(config)
}

/// Register the remote backends with settings from the config file and flags
fn register_backends(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let timeout = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.ssh.timeout());

    let mut scp = Options::new()
        .with(Profiles::new(config.hosts.clone()))
        .with(Timeout(timeout));
    if let Some(ssh) = ssh_config(cli, &config.ssh)? {
        scp.push(ssh);
    }
    afs_scp::register(scp);
    afs_tar::register(Options::new().with(Timeout(timeout)));
    Ok(())
}

/// SSH settings for hosts that have no profile; flags win over the config file
fn ssh_config(cli: &Cli, settings: &SshSettings) -> anyhow::Result<Option<SshConfig>> {
    let identity = cli.identity.as_ref().or(settings.identity_file.as_ref());
    let user = match cli.user.as_ref().or(settings.user.as_ref()) {
        Some(user) => user.clone(),
        None if cli.password.is_some() || identity.is_some() => std::env::var("USER")
            .context("--user is required when --password or --identity is given")?,
        None => return Ok(None),
    };
    let config = match (identity, &cli.password) {
        (Some(path), _) => {
            anyhow::ensure!(
                path.is_file(),
                "identity file {} does not exist",
                path.display()
            );
            SshConfig::key_file(user, path)
        }
        (None, Some(password)) => SshConfig::password(user, password.clone()),
        (None, None) => SshConfig::agent(user),
    };
    Ok(Some(config))
}

/// Manager serving `url`, reporting an unknown scheme as a usage error
pub(crate) fn manager_for(url: &str, formatter: &Formatter) -> Result<Arc<dyn Manager>, ExitCode> {
    registry::manager_for(url).map_err(|e| formatter.fail(url, &e))
}
