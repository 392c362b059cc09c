//! SSH connection settings
//!
//! Settings reach the provider as options: either a single [`SshConfig`]
//! used for every host, or [`Profiles`] matched against the URL host.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use afs_core::{Error, Host, Options, Result, url};

use crate::DEFAULT_PORT;

/// How the client proves its identity
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Keys offered by the running ssh-agent
    Agent,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(***)"),
            AuthMethod::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
            AuthMethod::Agent => f.write_str("Agent"),
        }
    }
}

/// Login settings for one SSH endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub user: String,
    pub auth: AuthMethod,
    pub port: u16,
    /// Expected server key fingerprint (`SHA256:...`); unverified when unset
    pub fingerprint: Option<String>,
}

impl SshConfig {
    pub fn new(user: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            user: user.into(),
            auth,
            port: DEFAULT_PORT,
            fingerprint: None,
        }
    }

    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(user, AuthMethod::Password(password.into()))
    }

    pub fn key_file(user: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(
            user,
            AuthMethod::KeyFile {
                path: path.into(),
                passphrase: None,
            },
        )
    }

    pub fn agent(user: impl Into<String>) -> Self {
        Self::new(user, AuthMethod::Agent)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Settings described by a host profile.
    ///
    /// A key file wins over a password; with neither, the agent is used.
    pub fn from_host(host: &Host) -> Self {
        let auth = match (&host.identity_file, &host.password) {
            (Some(path), _) => AuthMethod::KeyFile {
                path: PathBuf::from(path),
                passphrase: None,
            },
            (None, Some(password)) => AuthMethod::Password(password.clone()),
            (None, None) => AuthMethod::Agent,
        };
        Self {
            user: host.user.clone(),
            auth,
            port: host.port,
            fingerprint: host.fingerprint.clone(),
        }
    }
}

/// Named host profiles, matched against the URL host
#[derive(Debug, Clone, Default)]
pub struct Profiles(Arc<Vec<Host>>);

impl Profiles {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self(Arc::new(hosts))
    }

    pub fn find(&self, name: &str) -> Option<&Host> {
        self.0.iter().find(|h| h.name == name)
    }
}

/// Where and how to connect for one base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub config: SshConfig,
}

impl Target {
    /// Resolve the dial target for `base` (`scp://[user@]host[:port]`).
    ///
    /// A matching profile takes precedence over a plain [`SshConfig`]. The
    /// URL's port and user override whatever the settings say.
    pub fn resolve(base: &str, options: &Options) -> Result<Self> {
        let endpoint = url::endpoint(base, DEFAULT_PORT)?;
        let profile = options
            .get::<Profiles>()
            .and_then(|profiles| profiles.find(&endpoint.host).cloned());

        let (host, mut config) = match profile {
            Some(profile) => (profile.address().to_string(), SshConfig::from_host(&profile)),
            None => {
                let config = options.get::<SshConfig>().ok_or_else(|| {
                    Error::Config(format!("no SSH settings for host '{}'", endpoint.host))
                })?;
                (endpoint.host.clone(), config)
            }
        };

        let endpoint = url::endpoint(base, config.port)?;
        if let Some(user) = endpoint.user {
            config.user = user;
        }
        Ok(Self {
            host,
            port: endpoint.port,
            config,
        })
    }
}
