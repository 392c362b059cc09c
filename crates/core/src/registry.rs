//! Process-wide scheme registry
//!
//! Backends register a manager per scheme during initialization; callers
//! resolve a URL to its manager afterwards. The `file` scheme is always
//! present.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::file;
use crate::option::Options;
use crate::storage::Manager;
use crate::url;

static MANAGERS: LazyLock<DashMap<String, Arc<dyn Manager>>> = LazyLock::new(|| {
    let managers: DashMap<String, Arc<dyn Manager>> = DashMap::new();
    managers.insert(file::SCHEME.to_string(), Arc::new(file::new(Options::new())));
    managers
});

/// Register (or replace) the manager for its scheme
pub fn register(manager: Arc<dyn Manager>) {
    let scheme = manager.scheme().to_string();
    if MANAGERS.insert(scheme.clone(), manager).is_some() {
        tracing::debug!(scheme = %scheme, "replaced registered manager");
    }
}

/// Manager registered for `scheme`
pub fn lookup(scheme: &str) -> Option<Arc<dyn Manager>> {
    MANAGERS.get(scheme).map(|entry| Arc::clone(entry.value()))
}

/// Manager for the scheme of `url`; bare paths resolve to `file`
pub fn manager_for(url: &str) -> Result<Arc<dyn Manager>> {
    let scheme = url::scheme(url, file::SCHEME);
    lookup(scheme).ok_or_else(|| Error::Config(format!("unsupported scheme '{scheme}' in {url}")))
}

/// Registered schemes, sorted
pub fn schemes() -> Vec<String> {
    let mut schemes: Vec<String> = MANAGERS.iter().map(|e| e.key().clone()).collect();
    schemes.sort();
    schemes
}
