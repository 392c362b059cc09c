//! afs-scp: SCP backend for afs
//!
//! Serves `scp://[user@]host[:port]/path` URLs. One authenticated SSH
//! connection is kept per endpoint; every operation runs in its own exec
//! session on it. Reads and writes speak the SCP source/sink protocol
//! directly over the session stream; delete and mkdir run shell commands.

pub mod config;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod ssh;
pub mod storager;
pub mod transport;

use std::time::Duration;

pub use config::{AuthMethod, Profiles, SshConfig};
pub use manager::{new, register};
pub use ssh::SshTransport;
pub use storager::Storager;
pub use transport::{Channel, CommandOutput, Transport};

/// Scheme served by this backend
pub const SCHEME: &str = "scp";

/// Port used when the URL names none
pub const DEFAULT_PORT: u16 = afs_core::host::DEFAULT_PORT;

/// Bound on opening a session when no `Timeout` option is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
