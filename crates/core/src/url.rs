//! URL decomposition and path utilities
//!
//! Locations are addressed as `scheme://authority/path` or `scheme:path`.
//! Archive schemes embed another URL: `tar:file:///data/a.tar!/inner/dir`,
//! where everything after the last `!` is the path inside the archive.
//! Every function here is pure; the same input always decomposes the same way.

use crate::error::{Error, Result};

/// Separator between an embedded URL and the path inside it
pub const EXTENSION_SEPARATOR: char = '!';

/// A decomposed location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Scheme without the trailing `:`
    pub scheme: String,
    /// `scheme://authority`, or `scheme:<embedded-url>` for archive schemes
    pub base: String,
    /// Cleaned path relative to the base
    pub path: String,
}

/// Return the URL scheme, or `default` when the URL carries none
pub fn scheme<'a>(url: &'a str, default: &'a str) -> &'a str {
    match url.find(':') {
        Some(pos) if pos > 1 && is_scheme(&url[..pos]) => &url[..pos],
        _ => default,
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

/// Split `url` into its base URL and path for the given scheme.
///
/// URLs without a scheme are treated as local paths of `scheme`.
pub fn split(url: &str, scheme: &str) -> Result<Location> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Config("URL was empty".into()));
    }

    let Some(rest) = url
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix(':'))
    else {
        if self::scheme(url, "") != "" {
            return Err(Error::InvalidUrl(format!(
                "expected scheme '{scheme}' in {url}"
            )));
        }
        return Ok(Location {
            scheme: scheme.to_string(),
            base: format!("{scheme}://"),
            path: clean(url),
        });
    };

    if let Some(authority_path) = rest.strip_prefix("//") {
        let (authority, path) = match authority_path.find('/') {
            Some(pos) => (&authority_path[..pos], &authority_path[pos..]),
            None => (authority_path, "/"),
        };
        return Ok(Location {
            scheme: scheme.to_string(),
            base: format!("{scheme}://{authority}"),
            path: clean(path),
        });
    }

    let (embedded, inner) = match rest.rfind(EXTENSION_SEPARATOR) {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None if self::scheme(rest, "") != "" => (rest, "/"),
        None => {
            return Ok(Location {
                scheme: scheme.to_string(),
                base: format!("{scheme}://"),
                path: clean(rest),
            });
        }
    };
    if embedded.is_empty() {
        return Err(Error::Config(format!("extended URL was empty: {url}")));
    }
    Ok(Location {
        scheme: scheme.to_string(),
        base: format!("{scheme}:{embedded}"),
        path: clean(&format!("/{inner}")),
    })
}

/// Return the URL embedded in an archive base URL (`tar:file:///a.tar` → `file:///a.tar`)
pub fn embedded<'a>(base: &'a str, scheme: &str) -> Option<&'a str> {
    base.strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|rest| !rest.starts_with("//") && !rest.is_empty())
}

/// Join a base URL (or path) with a relative path
pub fn join(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Join path segments, skipping empty ones
pub fn join_path(parent: &str, name: &str) -> String {
    match (parent.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}/{}", parent.trim_end_matches('/'), name),
    }
}

/// Split a path into its parent and final element
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}

/// Lexically clean a path: collapse separators, resolve `.` and `..`
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Host endpoint extracted from an authority-style base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// `host:port` dial address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the authority of `base` into user, host and port
pub fn endpoint(base: &str, default_port: u16) -> Result<Endpoint> {
    let parsed = ::url::Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::InvalidUrl(format!("missing host in {base}")))?;
    let user = Some(parsed.username())
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    Ok(Endpoint {
        user,
        host: host.to_string(),
        port: parsed.port().unwrap_or(default_port),
    })
}
