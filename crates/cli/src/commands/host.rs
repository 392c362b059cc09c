//! Host profile commands
//!
//! A profile names an SSH endpoint with its login settings. `scp://` URLs
//! whose host matches a profile name connect with that profile.

use clap::Subcommand;
use serde::Serialize;

use afs_core::{Host, HostManager};

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Host subcommands for managing SSH login profiles
#[derive(Subcommand, Debug)]
pub enum HostCommands {
    /// Add or update a host profile
    Set(SetArgs),

    /// List all configured host profiles
    List(ListArgs),

    /// Remove a host profile
    Remove(RemoveArgs),
}

/// Arguments for the `host set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Profile name, used as the host in `scp://<name>/path`
    pub name: String,

    /// Login user
    #[arg(long = "login")]
    pub login: String,

    /// Host to dial when it differs from the profile name
    #[arg(long)]
    pub hostname: Option<String>,

    /// SSH port
    #[arg(long, default_value_t = afs_core::host::DEFAULT_PORT)]
    pub port: u16,

    /// Private key file
    #[arg(long)]
    pub identity_file: Option<String>,

    /// Password, used when no key file is set
    #[arg(long)]
    pub secret: Option<String>,

    /// Expected server key fingerprint (SHA256:...)
    #[arg(long)]
    pub fingerprint: Option<String>,
}

/// Arguments for the `host list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `host remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the profile to remove
    pub name: String,
}

/// JSON output for host list
#[derive(Serialize)]
struct HostListOutput {
    hosts: Vec<HostInfo>,
}

/// Host information for JSON output (without credentials)
#[derive(Serialize)]
struct HostInfo {
    name: String,
    user: String,
    address: String,
    port: u16,
    auth: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
}

impl From<&Host> for HostInfo {
    fn from(host: &Host) -> Self {
        let auth = match (&host.identity_file, &host.password) {
            (Some(_), _) => "key",
            (None, Some(_)) => "password",
            (None, None) => "agent",
        };
        Self {
            name: host.name.clone(),
            user: host.user.clone(),
            address: host.address().to_string(),
            port: host.port,
            auth,
            fingerprint: host.fingerprint.clone(),
        }
    }
}

/// JSON output for host set/remove operations
#[derive(Serialize)]
struct HostOperationOutput {
    success: bool,
    host: String,
    message: String,
}

/// Execute a host subcommand
pub fn execute(cmd: HostCommands, formatter: &Formatter) -> ExitCode {
    let manager = match HostManager::new() {
        Ok(manager) => manager,
        Err(e) => return formatter.fail("load host profiles", &e),
    };

    match cmd {
        HostCommands::Set(args) => execute_set(args, &manager, formatter),
        HostCommands::List(args) => execute_list(args, &manager, formatter),
        HostCommands::Remove(args) => execute_remove(args, &manager, formatter),
    }
}

fn profile(args: SetArgs) -> Result<Host, String> {
    if args.name.is_empty() || args.name.contains(['/', ':', '@']) {
        return Err(format!("Invalid host name '{}'", args.name));
    }
    if args.login.is_empty() {
        return Err("Login user cannot be empty".to_string());
    }
    if args.port == 0 {
        return Err("Port must be between 1 and 65535".to_string());
    }
    if let Some(fingerprint) = &args.fingerprint
        && !fingerprint.starts_with("SHA256:")
    {
        return Err("Fingerprint must be in SHA256:<base64> form".to_string());
    }

    let mut host = Host::new(args.name, args.login);
    host.hostname = args.hostname;
    host.port = args.port;
    host.identity_file = args.identity_file;
    host.password = args.secret;
    host.fingerprint = args.fingerprint;
    Ok(host)
}

fn execute_set(args: SetArgs, manager: &HostManager, formatter: &Formatter) -> ExitCode {
    let host = match profile(args) {
        Ok(host) => host,
        Err(msg) => {
            formatter.error(&msg);
            return ExitCode::UsageError;
        }
    };
    let name = host.name.clone();

    if let Err(e) = manager.set(host) {
        return formatter.fail(&format!("save host '{name}'"), &e);
    }
    if formatter.is_json() {
        formatter.json(&HostOperationOutput {
            success: true,
            host: name.clone(),
            message: format!("Host '{name}' configured successfully"),
        });
    } else {
        formatter.success(&format!("Host '{name}' configured successfully."));
    }
    ExitCode::Success
}

fn execute_list(args: ListArgs, manager: &HostManager, formatter: &Formatter) -> ExitCode {
    let hosts = match manager.list() {
        Ok(hosts) => hosts,
        Err(e) => return formatter.fail("list hosts", &e),
    };

    if formatter.is_json() {
        formatter.json(&HostListOutput {
            hosts: hosts.iter().map(HostInfo::from).collect(),
        });
    } else if hosts.is_empty() {
        formatter.println("No hosts configured.");
    } else {
        for info in hosts.iter().map(HostInfo::from) {
            if args.long {
                formatter.println(&format!(
                    "{:<12} {}@{}:{} (auth: {}, fingerprint: {})",
                    info.name,
                    info.user,
                    info.address,
                    info.port,
                    info.auth,
                    info.fingerprint.as_deref().unwrap_or("unverified")
                ));
            } else {
                formatter.println(&format!("{:<12} {}@{}", info.name, info.user, info.address));
            }
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &HostManager, formatter: &Formatter) -> ExitCode {
    if let Err(e) = manager.remove(&args.name) {
        return formatter.fail(&format!("remove host '{}'", args.name), &e);
    }
    if formatter.is_json() {
        formatter.json(&HostOperationOutput {
            success: true,
            host: args.name.clone(),
            message: format!("Host '{}' removed successfully", args.name),
        });
    } else {
        formatter.success(&format!("Host '{}' removed successfully.", args.name));
    }
    ExitCode::Success
}
