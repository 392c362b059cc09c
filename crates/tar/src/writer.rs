//! Staged archive writer
//!
//! Entries are appended to an in-memory `tar::Builder`; the finished archive
//! is written to the underlying backend in one piece on close. A session
//! dropped without closing leaves the stored archive untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use afs_core::{
    Content, Error, FileInfo, Manager, Options, Result, Upload, check_cancelled, url,
};

use crate::reader::{BLOCK, normalize, padding};

/// How an uploader treats an existing archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Start a new archive, replacing any existing one
    #[default]
    Create,
    /// Keep the existing entries and add new ones after them
    Append,
}

/// Write session for one archive
pub struct ArchiveUpload {
    ctx: CancellationToken,
    archive_url: String,
    delegate: Arc<dyn Manager>,
    options: Options,
    /// Archive path the uploaded entries are placed under
    prefix: String,
    builder: tar::Builder<Vec<u8>>,
}

impl ArchiveUpload {
    pub async fn open(
        ctx: &CancellationToken,
        archive_url: &str,
        delegate: Arc<dyn Manager>,
        prefix: &str,
        mode: ArchiveMode,
        options: Options,
    ) -> Result<Self> {
        let existing = match mode {
            ArchiveMode::Create => Vec::new(),
            ArchiveMode::Append => {
                existing_entries(ctx, delegate.as_ref(), archive_url, &options).await?
            }
        };
        tracing::debug!(archive_url, ?mode, kept = existing.len(), "opened archive writer");
        Ok(Self {
            ctx: ctx.clone(),
            archive_url: archive_url.to_string(),
            delegate,
            options,
            prefix: normalize(prefix),
            builder: tar::Builder::new(existing),
        })
    }
}

/// Bytes of the stored archive up to (not including) its end marker
async fn existing_entries(
    ctx: &CancellationToken,
    delegate: &dyn Manager,
    archive_url: &str,
    options: &Options,
) -> Result<Vec<u8>> {
    if !delegate.exists(ctx, archive_url, options).await? {
        return Ok(Vec::new());
    }
    let mut reader = delegate.download(ctx, archive_url, options).await?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    let end = archive_end(&bytes)?;
    bytes.truncate(end);
    Ok(bytes)
}

/// Offset of the end-of-archive marker
pub(crate) fn archive_end(bytes: &[u8]) -> Result<usize> {
    let block = BLOCK as usize;
    let mut pos = 0;
    while pos + block <= bytes.len() {
        let header = &bytes[pos..pos + block];
        if header.iter().all(|b| *b == 0) {
            return Ok(pos);
        }
        let size = tar::Header::from_byte_slice(header)
            .entry_size()
            .map_err(|e| Error::Archive(e.to_string()))?;
        let advance = size + padding(size);
        pos += block
            + usize::try_from(advance).map_err(|_| Error::Archive("entry too large".into()))?;
    }
    if pos != bytes.len() {
        return Err(Error::Archive("archive ended inside an entry".into()));
    }
    Ok(pos)
}

fn header_for(info: &FileInfo) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mode(info.mode);
    header.set_mtime(u64::try_from(info.mod_time.as_second()).unwrap_or(0));
    if info.is_dir {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
    } else {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(info.size);
    }
    header
}

#[async_trait]
impl Upload for ArchiveUpload {
    async fn upload(
        &mut self,
        ctx: &CancellationToken,
        relative: &str,
        info: &FileInfo,
        content: Content<'_>,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let path = normalize(&url::join_path(
            &url::join_path(&self.prefix, relative),
            &info.name,
        ));
        if path.is_empty() {
            return Err(Error::Archive(format!("invalid entry name {:?}", info.name)));
        }

        let mut header = header_for(info);
        let result = if info.is_dir {
            self.builder
                .append_data(&mut header, &path, std::io::empty())
        } else {
            let mut data = Vec::with_capacity(info.size.min(1 << 20) as usize);
            AsyncReadExt::take(content, info.size)
                .read_to_end(&mut data)
                .await?;
            if (data.len() as u64) < info.size {
                return Err(Error::Archive(format!(
                    "content for {path} ended after {} of {} bytes",
                    data.len(),
                    info.size
                )));
            }
            self.builder.append_data(&mut header, &path, data.as_slice())
        };
        result.map_err(|e| Error::Archive(format!("{path}: {e}")))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self {
            ctx,
            archive_url,
            delegate,
            options,
            builder,
            ..
        } = *self;
        check_cancelled(&ctx)?;
        let bytes = builder.into_inner()?;
        delegate
            .upload(&ctx, &archive_url, 0o644, &bytes, &options)
            .await?;
        tracing::debug!(archive_url = %archive_url, size = bytes.len(), "archive written");
        Ok(())
    }
}
