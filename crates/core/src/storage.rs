//! Backend contract
//!
//! [`Storager`] is implemented once per medium and addresses locations inside
//! that medium. [`Manager`] exposes the same operations over full URLs and is
//! what callers resolve through the scheme registry.
//!
//! Everything readable is built on `walk`: existence, listing and single-shot
//! download are generic visitors over it, so a backend only has to get
//! traversal right once.

use std::any::Any;
use std::io::Cursor;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::option::{Matcher, Modifier, Options, Page};

/// Owned content stream handed back to callers
pub type Reader = Box<dyn AsyncRead + Send + Unpin>;

/// Borrowed content stream handed to visitors
pub type Content<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Metadata for a file or directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Base name of the entry
    pub name: String,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Permission bits
    pub mode: u32,

    /// Last modification time
    pub mod_time: Timestamp,

    /// Whether this is a directory
    pub is_dir: bool,
}

impl FileInfo {
    /// Create a new FileInfo for a file
    pub fn file(name: impl Into<String>, size: u64, mode: u32) -> Self {
        Self {
            name: name.into(),
            size,
            mode: mode & 0o7777,
            mod_time: Timestamp::now(),
            is_dir: false,
        }
    }

    /// Create a new FileInfo for a directory
    pub fn dir(name: impl Into<String>, mode: u32) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: mode & 0o7777,
            mod_time: Timestamp::now(),
            is_dir: true,
        }
    }

    pub fn with_mod_time(mut self, mod_time: Timestamp) -> Self {
        self.mod_time = mod_time;
        self
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// Receives entries during a walk.
///
/// `relative` is the entry's parent directory relative to the walk root; the
/// root itself and its direct children have `""`. Returning `Ok(false)` stops
/// the walk without error; an `Err` aborts it and is returned to the caller
/// unchanged. Calls for one walk never overlap.
#[async_trait]
pub trait Visitor: Send {
    async fn visit(&mut self, relative: &str, info: &FileInfo, content: Content<'_>)
    -> Result<bool>;
}

/// A write session bound to one destination.
///
/// `upload` may be called any number of times; `close` consumes the session
/// so it runs exactly once. Dropping an unclosed session releases it without
/// finalizing.
#[async_trait]
pub trait Upload: Send {
    async fn upload(
        &mut self,
        ctx: &CancellationToken,
        relative: &str,
        info: &FileInfo,
        content: Content<'_>,
    ) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Storage operations for one medium, addressed by location path
#[async_trait]
pub trait Storager: Send + Sync + 'static {
    /// Concrete backend name used in type-mismatch errors
    fn kind(&self) -> &'static str;

    /// Capability query: concrete type for delegating managers
    fn as_any(&self) -> &dyn Any;

    /// Returns true if the location resolves to at least one entry
    async fn exists(
        &self,
        ctx: &CancellationToken,
        location: &str,
        options: &Options,
    ) -> Result<bool> {
        let mut visitor = FirstVisitor::default();
        match self.walk(ctx, location, &mut visitor, options).await {
            Ok(()) => Ok(visitor.found),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes the entry and everything beneath it
    async fn delete(&self, ctx: &CancellationToken, location: &str, options: &Options)
    -> Result<()>;

    /// Paged, filtered walk collected into a list
    async fn list(
        &self,
        ctx: &CancellationToken,
        location: &str,
        options: &Options,
    ) -> Result<Vec<FileInfo>> {
        let mut visitor = ListVisitor::new(options.matcher(), options.page());
        self.walk(ctx, location, &mut visitor, options).await?;
        Ok(visitor.into_items())
    }

    /// Visits every entry at and beneath the location
    async fn walk(
        &self,
        ctx: &CancellationToken,
        location: &str,
        visitor: &mut dyn Visitor,
        options: &Options,
    ) -> Result<()>;

    /// Content of the first visited entry
    async fn download(
        &self,
        ctx: &CancellationToken,
        location: &str,
        options: &Options,
    ) -> Result<Reader> {
        let mut visitor = DownloadVisitor::default();
        self.walk(ctx, location, &mut visitor, options).await?;
        visitor.into_reader(location, options)
    }

    /// Opens a reusable write session under destination
    async fn uploader(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        options: &Options,
    ) -> Result<Box<dyn Upload>>;

    /// Writes content to destination in one shot
    async fn upload(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        mode: u32,
        content: &[u8],
        options: &Options,
    ) -> Result<()> {
        self.create(ctx, destination, mode, content, false, options)
            .await
    }

    /// Creates a file or directory
    async fn create(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        mode: u32,
        content: &[u8],
        is_dir: bool,
        options: &Options,
    ) -> Result<()>;
}

/// Storage operations addressed by full URL
#[async_trait]
pub trait Manager: Send + Sync {
    /// Scheme this manager serves
    fn scheme(&self) -> &str;

    async fn exists(&self, ctx: &CancellationToken, url: &str, options: &Options) -> Result<bool> {
        let mut visitor = FirstVisitor::default();
        match self.walk(ctx, url, &mut visitor, options).await {
            Ok(()) => Ok(visitor.found),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, ctx: &CancellationToken, url: &str, options: &Options) -> Result<()>;

    async fn list(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Vec<FileInfo>> {
        let mut visitor = ListVisitor::new(options.matcher(), options.page());
        self.walk(ctx, url, &mut visitor, options).await?;
        Ok(visitor.into_items())
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        url: &str,
        visitor: &mut dyn Visitor,
        options: &Options,
    ) -> Result<()>;

    async fn download(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Reader> {
        let mut visitor = DownloadVisitor::default();
        self.walk(ctx, url, &mut visitor, options).await?;
        visitor.into_reader(url, options)
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Box<dyn Upload>>;

    async fn upload(
        &self,
        ctx: &CancellationToken,
        url: &str,
        mode: u32,
        content: &[u8],
        options: &Options,
    ) -> Result<()> {
        self.create(ctx, url, mode, content, false, options).await
    }

    async fn create(
        &self,
        ctx: &CancellationToken,
        url: &str,
        mode: u32,
        content: &[u8],
        is_dir: bool,
        options: &Options,
    ) -> Result<()>;
}

/// Fail with `Cancelled` once the token fires
pub fn check_cancelled(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Stops at the first visited entry
#[derive(Debug, Default)]
struct FirstVisitor {
    found: bool,
}

#[async_trait]
impl Visitor for FirstVisitor {
    async fn visit(&mut self, _: &str, _: &FileInfo, _: Content<'_>) -> Result<bool> {
        self.found = true;
        Ok(false)
    }
}

/// Collects matcher-accepted entries within a page.
///
/// Paging counts only entries the matcher accepts, and the walk stops as soon
/// as the page is full. Each entry keeps the parent path it was visited with.
#[derive(Debug)]
pub struct ListVisitor {
    matcher: Matcher,
    page: Page,
    entries: Vec<(String, FileInfo)>,
}

impl ListVisitor {
    pub fn new(matcher: Matcher, page: Page) -> Self {
        Self {
            matcher,
            page,
            entries: Vec::new(),
        }
    }

    /// Collected `(relative, info)` pairs in visit order
    pub fn into_entries(self) -> Vec<(String, FileInfo)> {
        self.entries
    }

    pub fn into_items(self) -> Vec<FileInfo> {
        self.entries.into_iter().map(|(_, info)| info).collect()
    }
}

#[async_trait]
impl Visitor for ListVisitor {
    async fn visit(&mut self, relative: &str, info: &FileInfo, _: Content<'_>) -> Result<bool> {
        if !self.matcher.matches(relative, info) {
            return Ok(true);
        }
        self.page.increment();
        if self.page.shall_skip() {
            return Ok(true);
        }
        self.entries.push((relative.to_string(), info.clone()));
        Ok(!self.page.has_reached_limit())
    }
}

/// Reads the content of the first visited entry
#[derive(Debug, Default)]
struct DownloadVisitor {
    first: Option<(FileInfo, Vec<u8>)>,
}

impl DownloadVisitor {
    fn into_reader(self, location: &str, options: &Options) -> Result<Reader> {
        let (info, content) = self
            .first
            .ok_or_else(|| Error::NotFound(location.to_string()))?;
        if info.is_dir {
            return Err(Error::Unsupported(format!(
                "cannot download directory {location}"
            )));
        }
        let reader: Reader = Box::new(Cursor::new(content));
        match options.get::<Modifier>() {
            Some(modifier) => modifier.apply(&info, reader),
            None => Ok(reader),
        }
    }
}

#[async_trait]
impl Visitor for DownloadVisitor {
    async fn visit(&mut self, _: &str, info: &FileInfo, content: Content<'_>) -> Result<bool> {
        let mut buf = Vec::with_capacity(info.size.min(1 << 20) as usize);
        if !info.is_dir {
            content.read_to_end(&mut buf).await?;
        }
        self.first = Some((info.clone(), buf));
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_file() {
        let info = FileInfo::file("test.txt", 1024, 0o100644);
        assert_eq!(info.name, "test.txt");
        assert_eq!(info.size, 1024);
        assert_eq!(info.mode, 0o644);
        assert!(!info.is_dir);
    }

    #[test]
    fn test_file_info_dir() {
        let info = FileInfo::dir("data", 0o755);
        assert_eq!(info.name, "data");
        assert!(info.is_dir);
        assert_eq!(info.size, 0);
    }

    #[test]
    fn test_size_human() {
        assert!(FileInfo::file("a", 512, 0o644).size_human().ends_with(" B"));
        assert!(FileInfo::file("a", 2048, 0o644).size_human().contains("KiB"));
    }

    #[tokio::test]
    async fn test_list_visitor_pages_after_matching() {
        let mut visitor = ListVisitor::new(
            Matcher::new(|_, info| info.name.ends_with(".txt")),
            Page::new(1, 1),
        );
        let names = ["a.txt", "skip.bin", "b.txt", "c.txt"];
        let mut empty = tokio::io::empty();
        for name in names {
            let info = FileInfo::file(name, 0, 0o644);
            if !visitor.visit("", &info, &mut empty).await.unwrap() {
                break;
            }
        }
        let got: Vec<_> = visitor.into_items().into_iter().map(|i| i.name).collect();
        assert_eq!(got, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_list_visitor_keeps_parent_paths() {
        let mut visitor = ListVisitor::new(Matcher::all(), Page::default());
        let mut empty = tokio::io::empty();
        visitor
            .visit("", &FileInfo::dir("b", 0o755), &mut empty)
            .await
            .unwrap();
        visitor
            .visit("b/d", &FileInfo::file("e.txt", 4, 0o644), &mut empty)
            .await
            .unwrap();
        let got: Vec<_> = visitor
            .into_entries()
            .into_iter()
            .map(|(relative, info)| (relative, info.name))
            .collect();
        assert_eq!(
            got,
            vec![
                (String::new(), "b".to_string()),
                ("b/d".to_string(), "e.txt".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_download_visitor_empty_is_not_found() {
        let visitor = DownloadVisitor::default();
        let err = visitor
            .into_reader("/missing", &Options::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_visitor_applies_modifier() {
        let mut visitor = DownloadVisitor::default();
        let info = FileInfo::file("a.txt", 5, 0o644);
        let mut content: &[u8] = b"hello";
        assert!(!visitor.visit("", &info, &mut content).await.unwrap());

        let options = Options::new().with(Modifier::new(|_, _| {
            Ok(Box::new(Cursor::new(b"HELLO".to_vec())) as Reader)
        }));
        let mut reader = visitor.into_reader("/a.txt", &options).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "HELLO");
    }
}
