//! rm command - Remove files and directory trees
//!
//! Every URL is attempted; the exit code reflects the first failure.

use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use afs_core::Options;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Remove files or directory trees
#[derive(Args, Debug)]
pub struct RmArgs {
    /// URL(s) to remove; directories are removed with everything beneath them
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Ignore locations that do not exist
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
    total: usize,
}

/// Execute the rm command
pub async fn execute(ctx: &CancellationToken, args: RmArgs, formatter: &Formatter) -> ExitCode {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut exit_code = ExitCode::Success;

    for url in &args.urls {
        let manager = match super::manager_for(url, formatter) {
            Ok(manager) => manager,
            Err(code) => return code,
        };
        match manager.delete(ctx, url, &Options::new()).await {
            Ok(()) => deleted.push(url.clone()),
            Err(e) if args.force && e.kind() == afs_core::ErrorKind::NotFound => {
                tracing::debug!(url = %url, "nothing to remove");
            }
            Err(e) => {
                let code = formatter.fail(&format!("remove {url}"), &e);
                if exit_code == ExitCode::Success {
                    exit_code = code;
                }
                failed.push(url.clone());
                if code == ExitCode::Interrupted {
                    break;
                }
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if failed.is_empty() { "success" } else { "partial" },
            total: deleted.len(),
            deleted,
            failed,
        });
    } else if !deleted.is_empty() {
        formatter.success(&format!("Removed {} location(s).", deleted.len()));
    }
    exit_code
}
