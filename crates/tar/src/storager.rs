//! Archive storager
//!
//! Reads the archive through the delegate manager as a single byte stream and
//! walks its members in order. Entries can only be skipped by consuming them,
//! so stopping a walk stops reading the stream.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use afs_core::{
    Content, Error, FileInfo, Manager, Matcher, Options, Result, Upload, Visitor,
    check_cancelled, storage, url,
};

use crate::reader::{ArchiveReader, normalize};
use crate::writer::{ArchiveMode, ArchiveUpload};

/// Storager for one archive held by another backend
pub struct Storager {
    archive_url: String,
    delegate: Arc<dyn Manager>,
}

impl Storager {
    pub fn new(archive_url: impl Into<String>, delegate: Arc<dyn Manager>) -> Self {
        Self {
            archive_url: archive_url.into(),
            delegate,
        }
    }

    /// URL of the archive on the delegate backend
    pub fn archive_url(&self) -> &str {
        &self.archive_url
    }

    async fn open_upload(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
        mode: ArchiveMode,
        options: Options,
    ) -> Result<ArchiveUpload> {
        ArchiveUpload::open(
            ctx,
            &self.archive_url,
            Arc::clone(&self.delegate),
            prefix,
            mode,
            options,
        )
        .await
    }
}

/// Visits archive members found in the first file the delegate yields
struct Scan<'a> {
    ctx: &'a CancellationToken,
    prefix: &'a str,
    matcher: Matcher,
    visitor: &'a mut dyn Visitor,
    /// The archive itself was reached
    opened: bool,
    /// At least one member lies at or under the prefix
    located: bool,
}

#[async_trait]
impl Visitor for Scan<'_> {
    async fn visit(&mut self, _: &str, info: &FileInfo, content: Content<'_>) -> Result<bool> {
        if info.is_dir {
            return Err(Error::Unsupported(format!(
                "{} is a directory, not an archive",
                info.name
            )));
        }
        self.opened = true;

        let mut reader = ArchiveReader::new(content);
        while let Some(entry) = reader.next_entry().await? {
            check_cancelled(self.ctx)?;
            let Some(relative) = entry.locate(self.prefix) else {
                continue;
            };
            self.located = true;
            if !self.matcher.matches(&relative, &entry.info) {
                continue;
            }

            let mut data = reader.content();
            if !self.visitor.visit(&relative, &entry.info, &mut data).await? {
                break;
            }
            tokio::io::copy(&mut data, &mut tokio::io::sink()).await?;
            if data.limit() > 0 {
                return Err(Error::Archive(format!("{} is truncated", entry.path)));
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl storage::Storager for Storager {
    fn kind(&self) -> &'static str {
        "tar"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn delete(&self, _: &CancellationToken, location: &str, _: &Options) -> Result<()> {
        Err(Error::Unsupported(format!(
            "cannot delete {location} inside {}",
            self.archive_url
        )))
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        location: &str,
        visitor: &mut dyn Visitor,
        options: &Options,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        // members are opaque to the delegate
        let (matcher, rest) = options.take::<Matcher>();
        let prefix = normalize(location);
        let mut scan = Scan {
            ctx,
            prefix: &prefix,
            matcher: matcher.unwrap_or_default(),
            visitor,
            opened: false,
            located: false,
        };
        self.delegate
            .walk(ctx, &self.archive_url, &mut scan, &rest)
            .await?;
        tracing::debug!(
            archive_url = %self.archive_url,
            prefix = %prefix,
            located = scan.located,
            "archive scanned"
        );

        if !scan.opened {
            return Err(Error::NotFound(self.archive_url.clone()));
        }
        if !scan.located && !prefix.is_empty() {
            return Err(Error::NotFound(format!("{}!/{prefix}", self.archive_url)));
        }
        Ok(())
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        options: &Options,
    ) -> Result<Box<dyn Upload>> {
        check_cancelled(ctx)?;
        let (mode, rest) = options.take::<ArchiveMode>();
        let upload = self
            .open_upload(ctx, destination, mode.unwrap_or_default(), rest)
            .await?;
        Ok(Box::new(upload))
    }

    async fn create(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        mode: u32,
        content: &[u8],
        is_dir: bool,
        options: &Options,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let path = normalize(destination);
        let (parent, name) = url::split_path(&path);
        if name.is_empty() {
            return Err(Error::Config(format!(
                "cannot create the root of {}",
                self.archive_url
            )));
        }
        let info = if is_dir {
            FileInfo::dir(name, mode)
        } else {
            FileInfo::file(name, content.len() as u64, mode)
        };

        let (_, rest) = options.take::<ArchiveMode>();
        let mut session = Box::new(self.open_upload(ctx, "", ArchiveMode::Append, rest).await?);
        let mut reader = content;
        session.upload(ctx, parent, &info, &mut reader).await?;
        session.close().await
    }
}
