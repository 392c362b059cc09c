//! afs-tar: tar archive backend for afs
//!
//! Serves `tar:<embedded-url>[!<inner-path>]` URLs such as
//! `tar:file:///data/archive.tar!/docs`. The archive itself lives on whatever
//! backend serves the embedded URL and is read as one sequential stream.

pub mod manager;
pub mod reader;
pub mod storager;
pub mod writer;

pub use manager::{Manager, register};
pub use reader::{ArchiveReader, Entry};
pub use storager::Storager;
pub use writer::{ArchiveMode, ArchiveUpload};

/// Scheme served by this backend
pub const SCHEME: &str = "tar";
