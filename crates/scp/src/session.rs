//! SCP source and sink sessions
//!
//! A [`ReadSession`] drives `scp -f` (the remote is the source) and hands each
//! entry to a visitor. A [`WriteSession`] drives `scp -t` (the remote is the
//! sink) and stays open across any number of uploads until closed.

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use afs_core::url;
use afs_core::{Content, Error, FileInfo, Result, Upload, Visitor, check_cancelled};

use crate::protocol::{self, FATAL, OK, Record, WARNING};
use crate::transport::Channel;

/// Mode used for directories the sink has to create on the way to an entry
const DIR_MODE: u32 = 0o755;

type Stream = BufReader<Box<dyn Channel>>;

async fn ack(stream: &mut Stream) -> Result<()> {
    stream.write_all(&[OK]).await?;
    stream.flush().await?;
    Ok(())
}

async fn release(stream: &mut Stream) {
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(error = %e, "session shutdown failed");
    }
}

/// Remote-source session
pub struct ReadSession {
    stream: Stream,
}

impl ReadSession {
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            stream: BufReader::new(channel),
        }
    }

    /// Visit every record the source sends.
    ///
    /// The channel is shut down as soon as the visitor stops, the context is
    /// cancelled or an error occurs; the remote sees a closed pipe and exits.
    pub async fn walk(mut self, ctx: &CancellationToken, visitor: &mut dyn Visitor) -> Result<()> {
        let result = self.run(ctx, visitor).await;
        release(&mut self.stream).await;
        result
    }

    async fn run(&mut self, ctx: &CancellationToken, visitor: &mut dyn Visitor) -> Result<()> {
        ack(&mut self.stream).await?;

        // Names of the directories entered so far; the first is the walk root.
        let mut dirs: Vec<String> = Vec::new();
        let mut mod_time: Option<Timestamp> = None;

        loop {
            let code = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                code = self.stream.read_u8() => match code {
                    Ok(code) => code,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
            };
            if code == WARNING || code == FATAL {
                return Err(protocol::remote_error(&mut self.stream).await);
            }

            let line = protocol::read_line(&mut self.stream).await?;
            let record = Record::parse(&format!("{}{line}", code as char))?;
            let relative = dirs.get(1..).map(|d| d.join("/")).unwrap_or_default();

            match record {
                Record::Time { mtime, .. } => {
                    mod_time = Timestamp::from_second(mtime).ok();
                    ack(&mut self.stream).await?;
                }
                Record::Dir { mode, name } => {
                    ack(&mut self.stream).await?;
                    let mut info = FileInfo::dir(name.as_str(), mode);
                    if let Some(ts) = mod_time.take() {
                        info = info.with_mod_time(ts);
                    }
                    if !visitor
                        .visit(&relative, &info, &mut tokio::io::empty())
                        .await?
                    {
                        return Ok(());
                    }
                    dirs.push(name);
                }
                Record::End => {
                    ack(&mut self.stream).await?;
                    dirs.pop();
                    if dirs.is_empty() {
                        return Ok(());
                    }
                }
                Record::File { mode, size, name } => {
                    ack(&mut self.stream).await?;
                    let mut info = FileInfo::file(name.as_str(), size, mode);
                    if let Some(ts) = mod_time.take() {
                        info = info.with_mod_time(ts);
                    }
                    if !self.visit_file(ctx, visitor, &relative, &info).await? {
                        return Ok(());
                    }
                    if dirs.is_empty() {
                        // a single-file source sends nothing after the file
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn visit_file(
        &mut self,
        ctx: &CancellationToken,
        visitor: &mut dyn Visitor,
        relative: &str,
        info: &FileInfo,
    ) -> Result<bool> {
        let mut content = (&mut self.stream).take(info.size);
        if !visitor.visit(relative, info, &mut content).await? {
            return Ok(false);
        }
        check_cancelled(ctx)?;
        tokio::io::copy(&mut content, &mut tokio::io::sink()).await?;
        if content.limit() > 0 {
            return Err(Error::Protocol(format!(
                "stream ended {} bytes short of {}",
                content.limit(),
                info.name
            )));
        }
        protocol::read_status(&mut self.stream).await?;
        ack(&mut self.stream).await?;
        Ok(true)
    }
}

/// Remote-sink session
pub struct WriteSession {
    stream: Stream,
    destination: String,
    /// Directories currently open below the destination
    dirs: Vec<String>,
}

impl WriteSession {
    /// Wait for the sink to report ready
    pub async fn start(channel: Box<dyn Channel>, destination: &str) -> Result<Self> {
        let mut stream = BufReader::new(channel);
        protocol::read_status(&mut stream).await?;
        tracing::debug!(destination, "opened write session");
        Ok(Self {
            stream,
            destination: destination.to_string(),
            dirs: Vec::new(),
        })
    }

    async fn send(&mut self, record: &Record) -> Result<()> {
        self.stream.write_all(record.encode().as_bytes()).await?;
        self.stream.flush().await?;
        protocol::read_status(&mut self.stream).await
    }

    /// Emit `E`/`D` records until the open directories equal `relative`.
    ///
    /// A newly opened last segment is sent with `mode`; parents opened on the
    /// way get [`DIR_MODE`].
    async fn change_dir(&mut self, relative: &str, mode: Option<u32>) -> Result<()> {
        let target: Vec<&str> = relative
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        for segment in &target {
            protocol::validate_name(segment)?;
        }

        let common = self
            .dirs
            .iter()
            .zip(&target)
            .take_while(|(open, wanted)| open.as_str() == **wanted)
            .count();
        while self.dirs.len() > common {
            self.send(&Record::End).await?;
            self.dirs.pop();
        }
        let last = target.len();
        for (depth, name) in target.iter().enumerate().skip(common) {
            let mode = match mode {
                Some(mode) if depth + 1 == last && mode != 0 => mode,
                _ => DIR_MODE,
            };
            self.send(&Record::Dir {
                mode,
                name: name.to_string(),
            })
            .await?;
            self.dirs.push(name.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Upload for WriteSession {
    async fn upload(
        &mut self,
        ctx: &CancellationToken,
        relative: &str,
        info: &FileInfo,
        content: Content<'_>,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        if info.is_dir {
            return self
                .change_dir(&url::join_path(relative, &info.name), Some(info.mode))
                .await;
        }
        self.change_dir(relative, None).await?;
        protocol::validate_name(&info.name)?;

        let seconds = info.mod_time.as_second();
        self.send(&Record::Time {
            mtime: seconds,
            atime: seconds,
        })
        .await?;
        self.send(&Record::File {
            mode: info.mode,
            size: info.size,
            name: info.name.clone(),
        })
        .await?;

        let mut limited = AsyncReadExt::take(content, info.size);
        let copied = tokio::io::copy(&mut limited, &mut self.stream).await?;
        if copied < info.size {
            return Err(Error::Protocol(format!(
                "content for {} ended after {copied} of {} bytes",
                info.name, info.size
            )));
        }
        self.stream.write_all(&[OK]).await?;
        self.stream.flush().await?;
        protocol::read_status(&mut self.stream).await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        while !self.dirs.is_empty() {
            self.send(&Record::End).await?;
            self.dirs.pop();
        }
        self.stream.shutdown().await?;
        tracing::debug!(destination = %self.destination, "closed write session");
        Ok(())
    }
}
