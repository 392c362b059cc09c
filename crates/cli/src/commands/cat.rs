//! cat command - Print file contents
//!
//! Streams each file to stdout in order; the first failure stops the rest.

use clap::Args;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use afs_core::Options;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Print file contents
#[derive(Args, Debug)]
pub struct CatArgs {
    /// File URL(s)
    #[arg(required = true)]
    pub urls: Vec<String>,
}

/// Execute the cat command
pub async fn execute(ctx: &CancellationToken, args: CatArgs, formatter: &Formatter) -> ExitCode {
    let mut stdout = tokio::io::stdout();
    for url in &args.urls {
        let manager = match super::manager_for(url, formatter) {
            Ok(manager) => manager,
            Err(code) => return code,
        };
        let mut reader = match manager.download(ctx, url, &Options::new()).await {
            Ok(reader) => reader,
            Err(e) => return formatter.fail(&format!("read {url}"), &e),
        };
        if let Err(e) = tokio::io::copy(&mut reader, &mut stdout).await {
            return formatter.fail(&format!("read {url}"), &e.into());
        }
    }
    if let Err(e) = stdout.flush().await {
        return formatter.fail("write stdout", &e.into());
    }
    ExitCode::Success
}
