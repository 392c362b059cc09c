//! mkdir command - Create directories
//!
//! Missing parents are created too; an existing directory is not an error.

use clap::Args;
use tokio_util::sync::CancellationToken;

use afs_core::Options;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Create directories
#[derive(Args, Debug)]
pub struct MkdirArgs {
    /// Directory URL(s)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Permission bits, in octal
    #[arg(short, long, default_value = "755", value_parser = parse_mode)]
    pub mode: u32,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| format!("'{value}' is not an octal mode"))
}

/// Execute the mkdir command
pub async fn execute(ctx: &CancellationToken, args: MkdirArgs, formatter: &Formatter) -> ExitCode {
    for url in &args.urls {
        let manager = match super::manager_for(url, formatter) {
            Ok(manager) => manager,
            Err(code) => return code,
        };
        if let Err(e) = manager
            .create(ctx, url, args.mode, &[], true, &Options::new())
            .await
        {
            return formatter.fail(&format!("mkdir {url}"), &e);
        }
        formatter.success(&format!("Created {url}"));
    }
    ExitCode::Success
}
