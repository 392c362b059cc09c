//! Command transport seam
//!
//! The SCP engine only needs two things from SSH: a bidirectional byte stream
//! attached to a remote command, and the collected output of a one-shot
//! command. Keeping them behind a trait lets the protocol run against an
//! in-process peer in tests.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use afs_core::Result;

/// Byte stream attached to a remote command's stdin/stdout
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Channel for T {}

/// Collected result of a one-shot remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, if the remote reported one
    pub status: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Authenticated connection able to start remote commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start `command` and return a stream bound to its stdio
    async fn open(&self, command: &str) -> Result<Box<dyn Channel>>;

    /// Run `command` to completion
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}
