//! SCP manager construction and registration

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use afs_core::{Error, Options, Result, Storager as _, base, registry};

use crate::config::Target;
use crate::ssh::SshTransport;
use crate::storager::Storager;
use crate::{DEFAULT_TIMEOUT, SCHEME};

/// Create the `scp` manager.
///
/// `options` become defaults for every call; they normally carry an
/// `SshConfig` or `Profiles` and optionally a `Timeout`.
pub fn new(options: Options) -> base::Manager {
    base::Manager::new(SCHEME, base::provider(connect), options)
}

/// Register the `scp` manager in the process registry
pub fn register(options: Options) {
    registry::register(Arc::new(new(options)));
}

async fn connect(
    ctx: CancellationToken,
    base_url: String,
    options: Options,
) -> Result<Arc<dyn afs_core::Storager>> {
    let target = Target::resolve(&base_url, &options)?;
    let timeout = options.timeout(DEFAULT_TIMEOUT);
    let transport = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        transport = SshTransport::connect(&target.host, target.port, &target.config, timeout) => transport?,
    };
    let storager = Storager::new(Arc::new(transport), timeout);
    tracing::debug!(base_url = %base_url, kind = storager.kind(), "storager ready");
    Ok(Arc::new(storager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_core::Manager as _;

    #[tokio::test]
    async fn test_missing_settings_fail_before_dialing() {
        let manager = new(Options::new());
        let err = manager
            .exists(
                &CancellationToken::new(),
                "scp://unconfigured:2222/data/file.txt",
                &Options::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(manager.cached(), 0);
    }

    #[tokio::test]
    async fn test_register_resolves_scheme() {
        register(Options::new());
        let manager = registry::manager_for("scp://host/path").unwrap();
        assert_eq!(manager.scheme(), "scp");
    }
}
