//! cp command - Copy files and trees
//!
//! Copies between any two locations, including across backends. A single
//! file is read whole and written in one shot; `--recursive` streams every
//! entry of the source walk into one write session on the target.

use async_trait::async_trait;
use clap::Args;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use afs_core::{Content, Error, FileInfo, Options, Result, Upload, Visitor, url};
use afs_tar::ArchiveMode;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Copy files and directory trees
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source URL
    pub source: String,

    /// Target URL; a trailing `/` copies into it under the source name
    pub target: String,

    /// Copy the contents of a directory tree
    #[arg(short, long)]
    pub recursive: bool,

    /// Add to an existing tar archive instead of replacing it
    #[arg(long)]
    pub append: bool,
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
    files: usize,
    size_bytes: u64,
    size_human: String,
}

/// Execute the cp command
pub async fn execute(ctx: &CancellationToken, args: CpArgs, formatter: &Formatter) -> ExitCode {
    let source = match super::manager_for(&args.source, formatter) {
        Ok(manager) => manager,
        Err(code) => return code,
    };
    let target = match super::manager_for(&args.target, formatter) {
        Ok(manager) => manager,
        Err(code) => return code,
    };
    let mut options = Options::new();
    if args.append {
        if target.scheme() != afs_tar::SCHEME {
            formatter.warning("--append only applies to tar archives; ignored");
        }
        options.push(ArchiveMode::Append);
    }

    let result = if args.recursive {
        copy_tree(ctx, &args, source.as_ref(), target.as_ref(), &options).await
    } else {
        copy_file(ctx, &args, source.as_ref(), target.as_ref(), &options).await
    };
    let (files, size_bytes, written) = match result {
        Ok(copied) => copied,
        Err(e) => return formatter.fail(&format!("copy {} to {}", args.source, args.target), &e),
    };

    let size_human = humansize::format_size(size_bytes, humansize::BINARY);
    if formatter.is_json() {
        formatter.json(&CpOutput {
            status: "success",
            source: args.source,
            target: written,
            files,
            size_bytes,
            size_human,
        });
    } else {
        formatter.success(&format!(
            "{} -> {written} ({files} file(s), {size_human})",
            args.source
        ));
    }
    ExitCode::Success
}

/// Copy one file; returns (files, bytes, target URL written)
async fn copy_file(
    ctx: &CancellationToken,
    args: &CpArgs,
    source: &dyn afs_core::Manager,
    target: &dyn afs_core::Manager,
    options: &Options,
) -> Result<(usize, u64, String)> {
    let mut first = FirstFile::default();
    source
        .walk(ctx, &args.source, &mut first, &Options::new())
        .await?;
    let (info, data) = first
        .file
        .ok_or_else(|| Error::NotFound(args.source.clone()))?;

    let destination = target_url(&args.target, &info.name);
    target
        .upload(ctx, &destination, info.mode, &data, options)
        .await?;
    Ok((1, data.len() as u64, destination))
}

/// Copy everything beneath the source into the target
async fn copy_tree(
    ctx: &CancellationToken,
    args: &CpArgs,
    source: &dyn afs_core::Manager,
    target: &dyn afs_core::Manager,
    options: &Options,
) -> Result<(usize, u64, String)> {
    let upload = target.uploader(ctx, &args.target, options).await?;
    let mut forward = Forward {
        ctx,
        root: base_name(&args.source).to_string(),
        upload,
        first: true,
        files: 0,
        bytes: 0,
    };
    source
        .walk(ctx, &args.source, &mut forward, &Options::new())
        .await?;
    let Forward {
        upload,
        files,
        bytes,
        ..
    } = forward;
    upload.close().await?;
    Ok((files, bytes, args.target.clone()))
}

/// Last path element of a URL
fn base_name(location: &str) -> &str {
    let path = location
        .rsplit_once(url::EXTENSION_SEPARATOR)
        .map_or(location, |(_, inner)| inner);
    url::split_path(path).1
}

fn target_url(target: &str, name: &str) -> String {
    if target.ends_with('/') {
        url::join(target, name)
    } else {
        target.to_string()
    }
}

/// Reads the first visited entry, which must be a file
#[derive(Default)]
struct FirstFile {
    file: Option<(FileInfo, Vec<u8>)>,
}

#[async_trait]
impl Visitor for FirstFile {
    async fn visit(&mut self, _: &str, info: &FileInfo, content: Content<'_>) -> Result<bool> {
        if info.is_dir {
            return Err(Error::Unsupported(format!(
                "{} is a directory (use --recursive)",
                info.name
            )));
        }
        let mut data = Vec::with_capacity(info.size.min(1 << 20) as usize);
        content.read_to_end(&mut data).await?;
        self.file = Some((info.clone(), data));
        Ok(false)
    }
}

/// Streams walked entries into a write session
struct Forward<'a> {
    ctx: &'a CancellationToken,
    /// Name of the walked location; its own directory entry is not copied
    root: String,
    upload: Box<dyn Upload>,
    first: bool,
    files: usize,
    bytes: u64,
}

#[async_trait]
impl Visitor for Forward<'_> {
    async fn visit(
        &mut self,
        relative: &str,
        info: &FileInfo,
        content: Content<'_>,
    ) -> Result<bool> {
        let first = std::mem::replace(&mut self.first, false);
        if first && relative.is_empty() && info.is_dir && info.name == self.root {
            return Ok(true);
        }
        self.upload.upload(self.ctx, relative, info, content).await?;
        if !info.is_dir {
            self.files += 1;
            self.bytes += info.size;
        }
        Ok(true)
    }
}
