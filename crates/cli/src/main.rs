//! afs - unified storage access CLI
//!
//! Lists, reads, copies and removes files on local disk, on SSH hosts over
//! SCP, and inside tar archives, all addressed by URL.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use afs_cli::commands::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let exit_code = commands::execute(cli).await;

    std::process::exit(exit_code.as_i32());
}
