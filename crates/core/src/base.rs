//! Base backend manager
//!
//! Turns a URL into a storager and dispatches to it. Storagers are built by a
//! provider function and cached per base URL (`scheme://authority`), so every
//! call against the same endpoint shares one connection. Construction is
//! single-flight per key: concurrent callers wait on the same cell, and a
//! failed construction leaves the cell empty for the next caller to retry.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::option::Options;
use crate::storage::{self, FileInfo, Reader, Storager, Upload, Visitor, check_cancelled};
use crate::url::{self, Location};

/// Builds a storager for a base URL
pub type Provider = Arc<
    dyn Fn(CancellationToken, String, Options) -> BoxFuture<'static, Result<Arc<dyn Storager>>>
        + Send
        + Sync,
>;

/// Wrap an async function as a [`Provider`]
pub fn provider<F, Fut>(f: F) -> Provider
where
    F: Fn(CancellationToken, String, Options) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Storager>>> + Send + 'static,
{
    Arc::new(move |ctx, base, options| Box::pin(f(ctx, base, options)))
}

/// Scheme-bound manager with a per-endpoint storager cache
pub struct Manager {
    scheme: String,
    provider: Provider,
    options: Options,
    storagers: DashMap<String, Arc<OnceCell<Arc<dyn Storager>>>>,
}

impl Manager {
    /// Create a manager for `scheme` with default options applied to every call
    pub fn new(scheme: impl Into<String>, provider: Provider, options: Options) -> Self {
        Self {
            scheme: scheme.into(),
            provider,
            options,
            storagers: DashMap::new(),
        }
    }

    /// Call options merged over the manager defaults
    pub fn options(&self, options: &Options) -> Options {
        options.merge(&self.options)
    }

    /// Decompose a URL of this manager's scheme
    pub fn split(&self, url: &str) -> Result<Location> {
        url::split(url, &self.scheme)
    }

    /// Cached storager for `base_url`, constructing it on first use
    pub async fn storager(
        &self,
        ctx: &CancellationToken,
        base_url: &str,
        options: &Options,
    ) -> Result<Arc<dyn Storager>> {
        check_cancelled(ctx)?;
        if base_url.is_empty() {
            return Err(Error::Config("base URL was empty".into()));
        }
        let cell = self
            .storagers
            .entry(base_url.to_string())
            .or_default()
            .clone();
        let storager = cell
            .get_or_try_init(|| {
                tracing::debug!(scheme = %self.scheme, base_url, "constructing storager");
                (self.provider)(ctx.clone(), base_url.to_string(), options.clone())
            })
            .await?;
        Ok(Arc::clone(storager))
    }

    /// Drop a cached storager so the next call reconnects
    pub fn evict(&self, base_url: &str) -> bool {
        self.storagers.remove(base_url).is_some()
    }

    /// Number of cached storagers
    pub fn cached(&self) -> usize {
        self.storagers
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    async fn resolve(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<(Arc<dyn Storager>, Location, Options)> {
        let location = self.split(url)?;
        let options = self.options(options);
        let storager = self.storager(ctx, &location.base, &options).await?;
        Ok((storager, location, options))
    }

    /// Evict the endpoint when its connection is gone
    fn observe<T>(&self, location: &Location, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && matches!(e.root(), Error::Connection(_))
            && self.evict(&location.base)
        {
            tracing::warn!(base_url = %location.base, "evicted storager after connection failure");
        }
        result
    }
}

#[async_trait]
impl storage::Manager for Manager {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn exists(&self, ctx: &CancellationToken, url: &str, options: &Options) -> Result<bool> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager.exists(ctx, &location.path, &options).await;
        self.observe(&location, result)
    }

    async fn delete(&self, ctx: &CancellationToken, url: &str, options: &Options) -> Result<()> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager
            .delete(ctx, &location.path, &options)
            .await
            .map_err(|e| e.context(format!("delete {url}")));
        self.observe(&location, result)
    }

    async fn list(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Vec<FileInfo>> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager.list(ctx, &location.path, &options).await;
        self.observe(&location, result)
    }

    async fn walk(
        &self,
        ctx: &CancellationToken,
        url: &str,
        visitor: &mut dyn Visitor,
        options: &Options,
    ) -> Result<()> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager.walk(ctx, &location.path, visitor, &options).await;
        self.observe(&location, result)
    }

    async fn download(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Reader> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager.download(ctx, &location.path, &options).await;
        self.observe(&location, result)
    }

    async fn uploader(
        &self,
        ctx: &CancellationToken,
        url: &str,
        options: &Options,
    ) -> Result<Box<dyn Upload>> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager.uploader(ctx, &location.path, &options).await;
        self.observe(&location, result)
    }

    async fn upload(
        &self,
        ctx: &CancellationToken,
        url: &str,
        mode: u32,
        content: &[u8],
        options: &Options,
    ) -> Result<()> {
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager
            .upload(ctx, &location.path, mode, content, &options)
            .await;
        self.observe(&location, result)
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
        let (storager, location, options) = self.resolve(ctx, url, options).await?;
        let result = storager
            .create(ctx, &location.path, mode, content, is_dir, &options)
            .await
            .map_err(|e| e.context(format!("create {url}")));
        self.observe(&location, result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::file::Storager as FileStorager;
    use crate::option::Timeout;
    use crate::storage::Manager as _;

    fn counting_manager(counter: Arc<AtomicUsize>) -> Manager {
        let provider = provider(move |_ctx, _base, _options| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(FileStorager::new()) as Arc<dyn Storager>)
            }
        });
        Manager::new("mem", provider, Options::new())
    }

    #[tokio::test]
    async fn test_storager_is_cached_per_base_url() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = counting_manager(Arc::clone(&counter));
        let ctx = CancellationToken::new();

        manager
            .storager(&ctx, "mem://a", &Options::new())
            .await
            .unwrap();
        manager
            .storager(&ctx, "mem://a", &Options::new())
            .await
            .unwrap();
        manager
            .storager(&ctx, "mem://b", &Options::new())
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(manager.cached(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_construction_is_single_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(counting_manager(Arc::clone(&counter)));
        let ctx = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                manager.storager(&ctx, "mem://host", &Options::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let provider = provider(move |_ctx, base, _options| {
            let attempt = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(Error::Connection(format!("failed to dial {base}")))
                } else {
                    Ok(Arc::new(FileStorager::new()) as Arc<dyn Storager>)
                }
            }
        });
        let manager = Manager::new("mem", provider, Options::new());
        let ctx = CancellationToken::new();

        let err = manager
            .storager(&ctx, "mem://host", &Options::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(manager.cached(), 0);

        manager
            .storager(&ctx, "mem://host", &Options::new())
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_options_reach_provider() {
        let provider = provider(|_ctx, _base, options: Options| async move {
            assert_eq!(options.timeout(Duration::ZERO), Duration::from_secs(7));
            Ok(Arc::new(FileStorager::new()) as Arc<dyn Storager>)
        });
        let manager = Manager::new(
            "file",
            provider,
            Options::new().with(Timeout(Duration::from_secs(7))),
        );
        let ctx = CancellationToken::new();
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert!(manager.exists(&ctx, &url, &Options::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_url_is_config_error() {
        let manager = counting_manager(Arc::new(AtomicUsize::new(0)));
        let ctx = CancellationToken::new();
        let err = manager.list(&ctx, "", &Options::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_construction() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = counting_manager(Arc::clone(&counter));
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = manager
            .storager(&ctx, "mem://host", &Options::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
