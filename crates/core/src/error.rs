//! Error types for afs-core
//!
//! Provides a unified error type shared by every backend. Each variant maps to
//! an [`ErrorKind`] so callers can tell transport failures (retryable) from
//! remote or semantic failures (not retryable) without matching on strings.

use thiserror::Error;

/// Result type alias for afs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for afs operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, detected before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL could not be decomposed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport dial or authentication failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A per-operation session could not be opened on a healthy connection
    #[error("Session failed: {0}")]
    Session(String),

    /// Session establishment exceeded the configured timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A remote shell command returned non-success
    #[error("Remote command `{command}` failed (status {status:?}): {stderr}")]
    RemoteCommand {
        command: String,
        status: Option<u32>,
        stderr: String,
    },

    /// The remote peer violated the transfer protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed archive content
    #[error("Archive error: {0}")]
    Archive(String),

    /// A delegating backend resolved a backend of an unexpected kind
    #[error("Unsupported storager type: expected {expected}, but had {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Permission denied by the remote or local medium
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not supported by backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error
    #[error("{0}")]
    General(String),

    /// An error with operation and location context attached
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Observable error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Permission,
    Transport,
    Cancelled,
    UnsupportedBackend,
    Usage,
    Other,
}

impl Error {
    /// Wrap the error with what was being done and where
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::Permission,
            Error::Connection(_) | Error::Session(_) | Error::Timeout(_) => ErrorKind::Transport,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::TimedOut => ErrorKind::Transport,
                _ => ErrorKind::Other,
            },
            Error::RemoteCommand { stderr, .. } => classify_message(stderr),
            Error::Cancelled => ErrorKind::Cancelled,
            Error::TypeMismatch { .. } | Error::Unsupported(_) => ErrorKind::UnsupportedBackend,
            Error::Config(_) | Error::InvalidUrl(_) => ErrorKind::Usage,
            _ => ErrorKind::Other,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// A failed connect is not retryable on the same storager; the manager
    /// never caches it, so a retry goes through reconstruction.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::Session(_) | Error::Timeout(_) => true,
            Error::Io(_) => self.kind() == ErrorKind::Transport,
            _ => false,
        }
    }

    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Usage => 2,
            ErrorKind::Transport => 3,
            ErrorKind::Permission => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::UnsupportedBackend => 7,
            ErrorKind::Cancelled => 130,
            ErrorKind::Other => 1,
        }
    }

    /// Map a message reported by a remote peer onto the closest variant
    pub fn from_remote_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_message(&message) {
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::Permission => Error::PermissionDenied(message),
            _ => Error::Protocol(message),
        }
    }
}

fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        ErrorKind::NotFound
    } else if lower.contains("permission denied") || lower.contains("operation not permitted") {
        ErrorKind::Permission
    } else {
        ErrorKind::Other
    }
}
