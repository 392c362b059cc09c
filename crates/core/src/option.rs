//! Typed option bag
//!
//! Callers pass an [`Options`] bag holding values of unrelated types. Each
//! component pulls out the types it understands and leaves the rest alone for
//! components further down the call chain. Lookups are by type, so the order
//! in which options were added never matters (the first value of a type wins).

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::storage::{FileInfo, Manager, Reader};
use crate::url;

/// Heterogeneous, cheaply clonable option bag
#[derive(Clone, Default)]
pub struct Options {
    items: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option, builder style
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Add an option
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.items.push(Arc::new(value));
    }

    /// First option of type `T`
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.items
            .iter()
            .find_map(|item| item.downcast_ref::<T>())
            .cloned()
    }

    /// Whether an option of type `T` is present
    pub fn has<T: Any>(&self) -> bool {
        self.items.iter().any(|item| item.is::<T>())
    }

    /// Remove the first option of type `T`, returning it with the remainder
    pub fn take<T: Any + Clone>(&self) -> (Option<T>, Options) {
        let mut taken = None;
        let mut rest = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if taken.is_none()
                && let Some(value) = item.downcast_ref::<T>()
            {
                taken = Some(value.clone());
                continue;
            }
            rest.push(Arc::clone(item));
        }
        (taken, Options { items: rest })
    }

    /// Combine call options with defaults; call options take precedence
    pub fn merge(&self, defaults: &Options) -> Options {
        let mut items = self.items.clone();
        items.extend(defaults.items.iter().cloned());
        Options { items }
    }

    /// Supplied matcher, or one that accepts everything
    pub fn matcher(&self) -> Matcher {
        self.get::<Matcher>().unwrap_or_default()
    }

    /// Supplied page, or an unbounded one
    pub fn page(&self) -> Page {
        self.get::<Page>().unwrap_or_default()
    }

    /// Supplied timeout, or `default`
    pub fn timeout(&self, default: Duration) -> Duration {
        self.get::<Timeout>().map(|t| t.0).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("len", &self.items.len())
            .finish()
    }
}

/// Offset/limit cursor applied on top of a filtered walk.
///
/// `limit == 0` means unbounded. The cursor is cloned fresh for every list
/// call, so the value stored in [`Options`] is never mutated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    offset: usize,
    limit: usize,
    counter: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            counter: 0,
        }
    }

    /// Count one accepted entry
    pub fn increment(&mut self) -> usize {
        self.counter += 1;
        self.counter
    }

    /// Current entry is still before the offset
    pub fn shall_skip(&self) -> bool {
        self.counter <= self.offset
    }

    /// Enough entries were collected
    pub fn has_reached_limit(&self) -> bool {
        self.limit > 0 && self.counter.saturating_sub(self.offset) >= self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

type MatchFn = dyn Fn(&str, &FileInfo) -> bool + Send + Sync;

/// Inclusion predicate over (relative parent path, entry)
#[derive(Clone)]
pub struct Matcher(Arc<MatchFn>);

impl Matcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &FileInfo) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Accept everything
    pub fn all() -> Self {
        Self::new(|_, _| true)
    }

    /// Match the entry's relative path (`parent/name`) against a glob pattern
    pub fn glob(pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| crate::Error::Config(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(Self::new(move |parent, info| {
            pattern.matches(&url::join_path(parent, &info.name))
        }))
    }

    pub fn matches(&self, parent: &str, info: &FileInfo) -> bool {
        (self.0)(parent, info)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher")
    }
}

type ModifyFn = dyn Fn(&FileInfo, Reader) -> Result<Reader> + Send + Sync;

/// Content transform applied to downloaded streams
#[derive(Clone)]
pub struct Modifier(Arc<ModifyFn>);

impl Modifier {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FileInfo, Reader) -> Result<Reader> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, info: &FileInfo, reader: Reader) -> Result<Reader> {
        (self.0)(info, reader)
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Modifier")
    }
}

/// Session establishment timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub Duration);

/// Underlying manager for delegating backends
#[derive(Clone)]
pub struct Delegate(pub Arc<dyn Manager>);

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Delegate").field(&self.0.scheme()).finish()
    }
}
