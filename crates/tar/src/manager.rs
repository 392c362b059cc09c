//! Archive manager
//!
//! Resolves `tar:<embedded-url>` to an archive storager through the shared
//! base manager, and refuses to read through any storager that is not one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use afs_core::{
    Delegate, Error, Options, Result, Upload, Visitor, base, registry, storage, url,
};

use crate::SCHEME;
use crate::storager::Storager;

/// Manager for `tar:` URLs
pub struct Manager {
    base: base::Manager,
}

impl Manager {
    /// Create the `tar` manager.
    ///
    /// The archive bytes are read and written through a `Delegate` option
    /// when one is given, otherwise through the manager registered for the
    /// embedded URL's scheme.
    pub fn new(options: Options) -> Self {
        Self::with_provider(base::provider(connect), options)
    }

    fn with_provider(provider: base::Provider, options: Options) -> Self {
        Self {
            base: base::Manager::new(SCHEME, provider, options),
        }
    }

    /// Resolve the storager for `url` and check that it reads archives
    async fn archive(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<(Arc<dyn storage::Storager>, String, Options)> {
        let location = self.base.split(url)?;
        let options = self.base.options(options);
        let storager = self.base.storager(ctx, &location.base, &options).await?;
        if storager.as_any().downcast_ref::<Storager>().is_none() {
            return Err(Error::TypeMismatch {
                expected: "tar",
                actual: storager.kind(),
            });
        }
        Ok((storager, location.path, options))
    }
}

/// Register the `tar` manager in the process registry
pub fn register(options: Options) {
    registry::register(Arc::new(Manager::new(options)));
}

async fn connect(
    _ctx: CancellationToken,
    base_url: String,
    options: Options,
) -> Result<Arc<dyn storage::Storager>> {
    let embedded = url::embedded(&base_url, SCHEME)
        .ok_or_else(|| Error::Config(format!("no archive URL embedded in {base_url}")))?;
    let delegate = match options.get::<Delegate>() {
        Some(Delegate(manager)) => manager,
        None => registry::manager_for(embedded)?,
    };
    tracing::debug!(base_url = %base_url, delegate = delegate.scheme(), "archive storager ready");
    Ok(Arc::new(Storager::new(embedded, delegate)))
}

#[async_trait]
impl storage::Manager for Manager {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn delete(&self, ctx: &CancellationToken, url: &str, options: &Options) -> Result<()> {
        storage::Manager::delete(&self.base, ctx, url, options).await
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        url: &str,
        visitor: &mut dyn Visitor,
        options: &Options,
    ) -> Result<()> {
        let (storager, path, options) = self.archive(ctx, url, options).await?;
        storager.walk(ctx, &path, visitor, &options).await
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Box<dyn Upload>> {
        let (storager, path, options) = self.archive(ctx, url, options).await?;
        storager.uploader(ctx, &path, &options).await
    }

    async fn create(
        &self,
        ctx: &CancellationToken,
        url: &str,
        mode: u32,
        content: &[u8],
        is_dir: bool,
        options: &Options,
    ) -> Result<()> {
        let (storager, path, options) = self.archive(ctx, url, options).await?;
        storager
            .create(ctx, &path, mode, content, is_dir, &options)
            .await
            .map_err(|e| e.context(format!("create {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tests::build;
    use crate::writer::ArchiveMode;
    use afs_core::{ErrorKind, FileInfo, Manager as _, Matcher, file};
    use tokio::io::AsyncReadExt;

    fn archive(entries: &[(&str, Option<&[u8]>)]) -> (tempfile::TempDir, String) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("archive.tar");
        std::fs::write(&path, build(entries)).unwrap();
        let url = format!("tar:file://{}", path.display());
        (dir, url)
    }

    #[tokio::test]
    async fn test_list_with_matcher_under_directory() {
        let (_dir, base) = archive(&[
            ("a.txt", Some(&b"alpha"[..])),
            ("b/c.txt", Some(&b"charlie"[..])),
        ]);
        let manager = Manager::new(Options::new());
        let options = Options::new().with(Matcher::new(|parent, _| parent == "b"));
        let items = manager
            .list(&CancellationToken::new(), &format!("{base}!/"), &options)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "c.txt");
        assert_eq!(items[0].size, 7);
    }

    #[tokio::test]
    async fn test_glob_matcher_over_members() {
        let (_dir, base) = archive(&[
            ("a.txt", Some(&b"alpha"[..])),
            ("b/c.txt", Some(&b"charlie"[..])),
        ]);
        let manager = Manager::new(Options::new());
        let options = Options::new().with(Matcher::glob("b/*").unwrap());
        let items = manager
            .list(&CancellationToken::new(), &base, &options)
            .await
            .unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn test_download_inner_file() {
        let (_dir, base) = archive(&[("docs/readme.md", Some(&b"# afs"[..]))]);
        let manager = Manager::new(Options::new());
        let mut reader = manager
            .download(
                &CancellationToken::new(),
                &format!("{base}!/docs/readme.md"),
                &Options::new(),
            )
            .await
            .unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "# afs");
    }

    #[tokio::test]
    async fn test_delegate_option_is_used() {
        let (_dir, base) = archive(&[("a.txt", Some(&b"alpha"[..]))]);
        let delegate: Arc<dyn afs_core::Manager> = Arc::new(file::new(Options::new()));
        let manager = Manager::new(Options::new().with(Delegate(delegate)));
        let ctx = CancellationToken::new();
        assert!(manager
            .exists(&ctx, &format!("{base}!/a.txt"), &Options::new())
            .await
            .unwrap());
        assert!(!manager
            .exists(&ctx, &format!("{base}!/z.txt"), &Options::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_upload_modes() {
        let (_dir, base) = archive(&[("a.txt", Some(&b"alpha"[..]))]);
        let manager = Manager::new(Options::new());
        let ctx = CancellationToken::new();

        let append = Options::new().with(ArchiveMode::Append);
        let mut upload = manager.uploader(&ctx, &base, &append).await.unwrap();
        let mut content: &[u8] = b"bravo";
        upload
            .upload(&ctx, "", &FileInfo::file("b.txt", 5, 0o644), &mut content)
            .await
            .unwrap();
        upload.close().await.unwrap();
        let items = manager.list(&ctx, &base, &Options::new()).await.unwrap();
        assert_eq!(items.len(), 2);

        let mut upload = manager.uploader(&ctx, &base, &Options::new()).await.unwrap();
        let mut content: &[u8] = b"charlie";
        upload
            .upload(&ctx, "", &FileInfo::file("c.txt", 7, 0o644), &mut content)
            .await
            .unwrap();
        upload.close().await.unwrap();
        let items = manager.list(&ctx, &base, &Options::new()).await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::TempDir::new().unwrap();
        let base = format!("tar:file://{}/new.tar", dir.path().display());
        let manager = Manager::new(Options::new());
        let ctx = CancellationToken::new();
        let url = format!("{base}!/data/file.txt");

        manager
            .upload(&ctx, &url, 0o644, b"round trip", &Options::new())
            .await
            .unwrap();
        let mut reader = manager.download(&ctx, &url, &Options::new()).await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "round trip");
    }

    #[tokio::test]
    async fn test_delete_is_unsupported() {
        let (_dir, base) = archive(&[("a.txt", Some(&b"alpha"[..]))]);
        let manager = Manager::new(Options::new());
        let err = manager
            .delete(
                &CancellationToken::new(),
                &format!("{base}!/a.txt"),
                &Options::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    }

    #[tokio::test]
    async fn test_foreign_storager_is_type_mismatch() {
        let manager = Manager::with_provider(
            base::provider(|_ctx, _base, _options| async {
                Ok(Arc::new(file::Storager::new()) as Arc<dyn storage::Storager>)
            }),
            Options::new(),
        );
        let mut visited = 0usize;
        struct Count<'a>(&'a mut usize);

        #[async_trait]
        impl Visitor for Count<'_> {
            async fn visit(
                &mut self,
                _: &str,
                _: &FileInfo,
                _: afs_core::Content<'_>,
            ) -> Result<bool> {
                *self.0 += 1;
                Ok(true)
            }
        }

        let err = manager
            .walk(
                &CancellationToken::new(),
                "tar:file:///tmp/archive.tar!/",
                &mut Count(&mut visited),
                &Options::new(),
            )
            .await
            .unwrap_err();
        match err {
            Error::TypeMismatch { expected, actual } => {
                assert_eq!(expected, "tar");
                assert_eq!(actual, "file");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(visited, 0);
    }

    #[tokio::test]
    async fn test_missing_embedded_url() {
        let manager = Manager::new(Options::new());
        let err = manager
            .list(&CancellationToken::new(), "tar:!/a", &Options::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn test_register_resolves_scheme() {
        register(Options::new());
        let manager = registry::manager_for("tar:file:///data/a.tar!/x").unwrap();
        assert_eq!(manager.scheme(), "tar");
    }
}
