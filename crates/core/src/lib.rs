//! afs-core: Core library for unified storage access
//!
//! This crate provides the pieces shared by every afs backend:
//! - The backend contract (`Storager`, `Manager`, `Visitor`, `Upload`)
//! - The typed option bag with matchers, paging and download modifiers
//! - A base manager that caches one storager per endpoint
//! - The process-wide scheme registry and the local `file` backend
//! - URL decomposition, configuration and host profiles
//!
//! Backends for other media live in their own crates and register their
//! managers here at startup.

pub mod base;
pub mod config;
pub mod error;
pub mod file;
pub mod host;
pub mod option;
pub mod registry;
pub mod storage;
pub mod url;

pub use config::{Config, ConfigManager, OutputFormat, SshSettings};
pub use error::{Error, ErrorKind, Result};
pub use host::{Host, HostManager};
pub use option::{Delegate, Matcher, Modifier, Options, Page, Timeout};
pub use storage::{
    Content, FileInfo, ListVisitor, Manager, Reader, Storager, Upload, Visitor, check_cancelled,
};
pub use url::Location;
