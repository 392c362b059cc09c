//! Host profile management
//!
//! Hosts are named SSH login profiles. A `scp://` URL whose host matches a
//! profile name picks up that profile's user, port and credentials.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Named SSH login profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Profile name; also matched against the host of `scp://` URLs
    pub name: String,

    /// Login user
    pub user: String,

    /// Host to dial when it differs from the profile name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Private key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    /// Password, used when no key is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Expected server key fingerprint (`SHA256:...`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Host {
    /// Create a profile with the required fields
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            hostname: None,
            port: DEFAULT_PORT,
            identity_file: None,
            password: None,
            fingerprint: None,
        }
    }

    /// Host to dial
    pub fn address(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }
}

/// Manager for host profile operations
pub struct HostManager {
    config_manager: ConfigManager,
}

impl HostManager {
    /// Create a new HostManager with a specific ConfigManager
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Create a new HostManager using the default config location
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        Ok(Self { config_manager })
    }

    /// List all configured hosts
    pub fn list(&self) -> Result<Vec<Host>> {
        let config = self.config_manager.load()?;
        Ok(config.hosts)
    }

    /// Get a host by name
    pub fn get(&self, name: &str) -> Result<Host> {
        self.find(name)?
            .ok_or_else(|| Error::NotFound(format!("host profile '{name}'")))
    }

    /// Get a host by name, if configured
    pub fn find(&self, name: &str) -> Result<Option<Host>> {
        let config = self.config_manager.load()?;
        Ok(config.hosts.into_iter().find(|h| h.name == name))
    }

    /// Add or update a host
    pub fn set(&self, host: Host) -> Result<()> {
        let mut config = self.config_manager.load()?;
        config.hosts.retain(|h| h.name != host.name);
        config.hosts.push(host);
        self.config_manager.save(&config)
    }

    /// Remove a host
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let original_len = config.hosts.len();

        config.hosts.retain(|h| h.name != name);

        if config.hosts.len() == original_len {
            return Err(Error::NotFound(format!("host profile '{name}'")));
        }

        self.config_manager.save(&config)
    }
}
