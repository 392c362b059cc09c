//! SCP storager
//!
//! Holds the transport for one endpoint and the time bound on every remote call.
//! Reads and uploads run the SCP protocol; delete and directory creation run
//! shell commands and report their stderr on failure.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use afs_core::url;
use afs_core::{Error, FileInfo, Options, Result, Upload, Visitor, check_cancelled, storage};

use crate::protocol::quote;
use crate::session::{ReadSession, WriteSession};
use crate::transport::{Channel, CommandOutput, Transport};

/// SCP storager for one endpoint
pub struct Storager {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Storager {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Start `command`, bounded by the session timeout
    async fn open(&self, command: &str) -> Result<Box<dyn Channel>> {
        tokio::time::timeout(self.timeout, self.transport.open(command))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "opening session for `{command}` exceeded {:?}",
                    self.timeout
                ))
            })?
    }

    /// Run `command` to completion, bounded by the session timeout
    async fn run(&self, ctx: &CancellationToken, command: String) -> Result<CommandOutput> {
        check_cancelled(ctx)?;
        let output = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            output = tokio::time::timeout(self.timeout, self.transport.run(&command)) => {
                output.map_err(|_| {
                    Error::Timeout(format!("`{command}` exceeded {:?}", self.timeout))
                })??
            }
        };
        if !output.success() {
            return Err(Error::RemoteCommand {
                stderr: output.stderr_lossy(),
                status: output.status,
                command,
            });
        }
        Ok(output)
    }

    /// Sink rooted at `destination`, which is created first
    async fn write_session(
        &self,
        ctx: &CancellationToken,
        destination: &str,
    ) -> Result<WriteSession> {
        let destination = url::clean(destination);
        self.run(ctx, format!("mkdir -p -- {}", quote(&destination))).await?;
        let command = format!("scp -r -d -p -t {}", quote(&destination));
        let channel = self.open(&command).await?;
        tokio::time::timeout(self.timeout, WriteSession::start(channel, &destination))
            .await
            .map_err(|_| Error::Timeout(format!("sink at {destination} did not become ready")))?
    }
}

#[async_trait]
impl storage::Storager for Storager {
    fn kind(&self) -> &'static str {
        "scp"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn delete(&self, ctx: &CancellationToken, location: &str, _: &Options) -> Result<()> {
        let path = url::clean(location);
        if path == "/" || path == "." {
            return Err(Error::Config(format!("refusing to delete '{location}'")));
        }
        self.run(ctx, format!("rm -rf -- {}", quote(&path))).await?;
        Ok(())
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        location: &str,
        visitor: &mut dyn Visitor,
        _: &Options,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let path = url::clean(location);
        let channel = self.open(&format!("scp -r -p -f {}", quote(&path))).await?;
        ReadSession::new(channel).walk(ctx, visitor).await
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        _: &Options,
    ) -> Result<Box<dyn Upload>> {
        check_cancelled(ctx)?;
        Ok(Box::new(self.write_session(ctx, destination).await?))
    }

    async fn create(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        mode: u32,
        content: &[u8],
        is_dir: bool,
        _: &Options,
    ) -> Result<()> {
        let path = url::clean(destination);
        if is_dir {
            self.run(ctx, format!("mkdir -p -- {}", quote(&path))).await?;
            return Ok(());
        }

        check_cancelled(ctx)?;
        let (parent, name) = url::split_path(&path);
        let parent = if parent.is_empty() { "." } else { parent };
        let mut session = Box::new(self.write_session(ctx, parent).await?);
        let info = FileInfo::file(name, content.len() as u64, mode);
        let mut reader = content;
        session.upload(ctx, "", &info, &mut reader).await?;
        session.close().await
    }
}
