//! Local filesystem backend
//!
//! Addressed as `file:///absolute/path` (or a bare path). Walks are pre-order
//! with children sorted by name, so the order is stable for an unchanged tree.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::base;
use crate::error::{Error, Result};
use crate::option::{Modifier, Options};
use crate::storage::{self, Content, FileInfo, Reader, Upload, Visitor, check_cancelled};
use crate::url;

/// Scheme served by this backend
pub const SCHEME: &str = "file";

/// Create the `file` manager
pub fn new(options: Options) -> base::Manager {
    let shared: Arc<dyn storage::Storager> = Arc::new(Storager::new());
    let provider = base::provider(move |_ctx, _base, _options| {
        let shared = Arc::clone(&shared);
        async move { Ok(shared) }
    });
    base::Manager::new(SCHEME, provider, options)
}

/// Local filesystem storager
#[derive(Debug, Default)]
pub struct Storager;

impl Storager {
    pub fn new() -> Self {
        Self
    }
}

fn map_io(err: std::io::Error, location: &str) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(location.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            Error::PermissionDenied(format!("{location}: {err}"))
        }
        _ => Error::Io(err),
    }
}

fn file_info(name: &str, meta: &std::fs::Metadata) -> FileInfo {
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    };
    #[cfg(not(unix))]
    let mode = if meta.is_dir() { 0o755 } else { 0o644 };

    let info = if meta.is_dir() {
        FileInfo::dir(name, mode)
    } else {
        FileInfo::file(name, meta.len(), mode)
    };
    match meta.modified().ok().and_then(|t| jiff::Timestamp::try_from(t).ok()) {
        Some(mod_time) => info.with_mod_time(mod_time),
        None => info,
    }
}

async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    if mode != 0 {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

async fn sorted_children(dir: &Path) -> Result<Vec<(PathBuf, FileInfo)>> {
    let location = dir.to_string_lossy();
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| map_io(e, &location))?;
    let mut children = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let meta = fs::metadata(entry.path()).await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        children.push((entry.path(), file_info(&name, &meta)));
    }
    children.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    Ok(children)
}

#[async_trait]
impl storage::Storager for Storager {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn delete(&self, ctx: &CancellationToken, location: &str, _: &Options) -> Result<()> {
        check_cancelled(ctx)?;
        let meta = fs::metadata(location)
            .await
            .map_err(|e| map_io(e, location))?;
        if meta.is_dir() {
            fs::remove_dir_all(location).await
        } else {
            fs::remove_file(location).await
        }
        .map_err(|e| map_io(e, location))
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        location: &str,
        visitor: &mut dyn Visitor,
        _: &Options,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let meta = fs::metadata(location)
            .await
            .map_err(|e| map_io(e, location))?;
        let (_, name) = url::split_path(location);
        let root = file_info(name, &meta);

        if !meta.is_dir() {
            let mut file = fs::File::open(location)
                .await
                .map_err(|e| map_io(e, location))?;
            visitor.visit("", &root, &mut file).await?;
            return Ok(());
        }

        if !visitor.visit("", &root, &mut tokio::io::empty()).await? {
            return Ok(());
        }

        let mut stack = vec![(String::new(), sorted_children(Path::new(location)).await?.into_iter())];
        while let Some((relative, children)) = stack.last_mut() {
            let Some((path, info)) = children.next() else {
                stack.pop();
                continue;
            };
            check_cancelled(ctx)?;
            let relative = relative.clone();
            if info.is_dir {
                if !visitor.visit(&relative, &info, &mut tokio::io::empty()).await? {
                    return Ok(());
                }
                let nested = sorted_children(&path).await?;
                stack.push((url::join_path(&relative, &info.name), nested.into_iter()));
            } else {
                let mut file = fs::File::open(&path).await?;
                if !visitor.visit(&relative, &info, &mut file).await? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn download(
        &self,
        ctx: &CancellationToken,
        location: &str,
        options: &Options,
    ) -> Result<Reader> {
        check_cancelled(ctx)?;
        let meta = fs::metadata(location)
            .await
            .map_err(|e| map_io(e, location))?;
        if meta.is_dir() {
            return Err(Error::Unsupported(format!(
                "cannot download directory {location}"
            )));
        }
        let file = fs::File::open(location)
            .await
            .map_err(|e| map_io(e, location))?;
        let reader: Reader = Box::new(file);
        match options.get::<Modifier>() {
            Some(modifier) => {
                let (_, name) = url::split_path(location);
                modifier.apply(&file_info(name, &meta), reader)
            }
            None => Ok(reader),
        }
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        destination: &str,
        _: &Options,
    ) -> Result<Box<dyn Upload>> {
        check_cancelled(ctx)?;
        fs::create_dir_all(destination)
            .await
            .map_err(|e| map_io(e, destination))?;
        Ok(Box::new(FileUpload {
            root: PathBuf::from(destination),
        }))
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
        check_cancelled(ctx)?;
        let path = Path::new(destination);
        if is_dir {
            fs::create_dir_all(path)
                .await
                .map_err(|e| map_io(e, destination))?;
            return set_mode(path, mode).await;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content)
            .await
            .map_err(|e| map_io(e, destination))?;
        set_mode(path, mode).await
    }
}

/// Write session rooted at a local directory
struct FileUpload {
    root: PathBuf,
}

#[async_trait]
impl Upload for FileUpload {
    async fn upload(
        &mut self,
        ctx: &CancellationToken,
        relative: &str,
        info: &FileInfo,
        content: Content<'_>,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let path = self
            .root
            .join(relative.trim_start_matches('/'))
            .join(&info.name);
        if info.is_dir {
            fs::create_dir_all(&path).await?;
            return set_mode(&path, info.mode).await;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        tokio::io::copy(content, &mut file).await?;
        file.flush().await?;
        set_mode(&path, info.mode).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::{Matcher, Page};
    use crate::storage::Storager as _;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct Collect {
        seen: Vec<String>,
        stop_after: Option<usize>,
    }

    #[async_trait]
    impl Visitor for Collect {
        async fn visit(&mut self, relative: &str, info: &FileInfo, _: Content<'_>) -> Result<bool> {
            self.seen.push(url::join_path(relative, &info.name));
            Ok(self.stop_after.is_none_or(|n| self.seen.len() < n))
        }
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b").join("c.txt"), b"charlie").unwrap();
        std::fs::write(dir.path().join("d.txt"), b"delta").unwrap();
        dir
    }

    fn root(dir: &TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_walk_is_preorder_and_sorted() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let mut visitor = Collect {
            seen: vec![],
            stop_after: None,
        };
        Storager::new()
            .walk(&ctx, &root(&dir), &mut visitor, &Options::new())
            .await
            .unwrap();
        let root_path = root(&dir);
        let (_, name) = url::split_path(&root_path);
        assert_eq!(
            visitor.seen,
            vec![name.to_string(), "a.txt".into(), "b".into(), "b/c.txt".into(), "d.txt".into()]
        );
    }

    #[tokio::test]
    async fn test_walk_early_stop() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let mut visitor = Collect {
            seen: vec![],
            stop_after: Some(2),
        };
        Storager::new()
            .walk(&ctx, &root(&dir), &mut visitor, &Options::new())
            .await
            .unwrap();
        assert_eq!(visitor.seen.len(), 2);
    }

    #[tokio::test]
    async fn test_walk_cancelled() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut visitor = Collect {
            seen: vec![],
            stop_after: None,
        };
        let err = Storager::new()
            .walk(&ctx, &root(&dir), &mut visitor, &Options::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(visitor.seen.is_empty());
    }

    #[tokio::test]
    async fn test_list_matches_unpaged_walk() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let all = storager.list(&ctx, &root(&dir), &Options::new()).await.unwrap();
        assert_eq!(all.len(), 5);

        let paged = storager
            .list(&ctx, &root(&dir), &Options::new().with(Page::new(1, 2)))
            .await
            .unwrap();
        let names: Vec<_> = paged.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b"]);

        let past_end = storager
            .list(&ctx, &root(&dir), &Options::new().with(Page::new(9, 3)))
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_stricter_matcher_never_grows_result() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let txt = Options::new().with(Matcher::new(|_, i| i.name.ends_with(".txt")));
        let under_b = Options::new().with(Matcher::new(|parent, i| {
            parent == "b" && i.name.ends_with(".txt")
        }));
        let loose = storager.list(&ctx, &root(&dir), &txt).await.unwrap();
        let strict = storager.list(&ctx, &root(&dir), &under_b).await.unwrap();
        assert_eq!(loose.len(), 3);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].name, "c.txt");
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        assert!(storager.exists(&ctx, &root(&dir), &Options::new()).await.unwrap());
        let missing = format!("{}/nope", root(&dir));
        assert!(!storager.exists(&ctx, &missing, &Options::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_then_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let dest = format!("{}/nested/file.txt", root(&dir));

        storager
            .create(&ctx, &dest, 0o644, b"hello", false, &Options::new())
            .await
            .unwrap();
        let mut reader = storager.download(&ctx, &dest, &Options::new()).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_create_dir_twice() {
        let dir = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let dest = format!("{}/made", root(&dir));
        for _ in 0..2 {
            storager
                .create(&ctx, &dest, 0o755, &[], true, &Options::new())
                .await
                .unwrap();
        }
        assert!(dir.path().join("made").is_dir());
    }

    #[tokio::test]
    async fn test_uploader_writes_many_entries() {
        let dir = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let mut upload = storager
            .uploader(&ctx, &root(&dir), &Options::new())
            .await
            .unwrap();

        let mut one: &[u8] = b"one";
        let mut two: &[u8] = b"two";
        upload
            .upload(&ctx, "", &FileInfo::file("1.txt", 3, 0o644), &mut one)
            .await
            .unwrap();
        upload
            .upload(&ctx, "sub/dir", &FileInfo::file("2.txt", 3, 0o644), &mut two)
            .await
            .unwrap();
        upload.close().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("1.txt")).unwrap(), b"one");
        assert_eq!(
            std::fs::read(dir.path().join("sub/dir/2.txt")).unwrap(),
            b"two"
        );
    }

    #[tokio::test]
    async fn test_delete_directory_recursively() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let storager = Storager::new();
        let target = format!("{}/b", root(&dir));
        storager.delete(&ctx, &target, &Options::new()).await.unwrap();
        assert!(!storager.exists(&ctx, &target, &Options::new()).await.unwrap());

        let err = storager
            .delete(&ctx, &target, &Options::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_directory_unsupported() {
        let dir = fixture();
        let ctx = CancellationToken::new();
        let err = Storager::new()
            .download(&ctx, &root(&dir), &Options::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
