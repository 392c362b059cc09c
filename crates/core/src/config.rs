//! Settings file
//!
//! `config.toml` lives under `$AFS_CONFIG_DIR`, or `afs/` in the platform
//! config directory. It carries output preferences, SSH defaults for hosts
//! without a profile, and the host profiles themselves:
//!
//! ```toml
//! schema_version = 2
//!
//! [output]
//! format = "json"
//! color = false
//!
//! [ssh]
//! timeout_secs = 30
//! user = "deploy"
//!
//! [[hosts]]
//! name = "build"
//! user = "ci"
//! port = 2222
//! ```
//!
//! Older files are upgraded in memory on load and rewritten on the next save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::host::Host;

/// Version written by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "AFS_CONFIG_DIR";

const FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: u32,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// ANSI colors in human output
    pub color: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Human,
            color: true,
        }
    }
}

/// Connection settings for `scp://` hosts that match no profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Bound on dialing, opening a session and running a remote command
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

impl SshSettings {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            user: None,
            identity_file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            output: OutputSettings::default(),
            ssh: SshSettings::default(),
            hosts: Vec::new(),
        }
    }
}

/// Reads and writes one settings file
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Settings file in the default location
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("no config directory for this platform".into()))?
                .join("afs"),
        };
        Ok(Self::with_path(dir.join(FILE_NAME)))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    /// Current settings; a missing file yields the defaults
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        let mut table: toml::Table = content.parse()?;

        let version = match table.get("schema_version") {
            None => SCHEMA_VERSION,
            Some(value) => value
                .as_integer()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::Config(format!("bad schema_version: {value}")))?,
        };
        if version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "{} uses schema {version}; this afs reads up to {SCHEMA_VERSION}",
                self.path.display()
            )));
        }
        if version < 2 {
            upgrade_v1(&mut table);
        }
        table.insert("schema_version".into(), i64::from(SCHEMA_VERSION).into());
        Ok(table.try_into()?)
    }

    /// Replace the file; it is readable by the owner only since profiles
    /// may hold passwords.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staged = self.path.with_extension("toml.new");
        std::fs::write(&staged, toml::to_string_pretty(config)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&staged, &self.path)?;
        tracing::debug!(path = %self.path.display(), hosts = config.hosts.len(), "saved config");
        Ok(())
    }
}

/// Schema 1 kept `output` and `timeout_ms` under `[defaults]`
fn upgrade_v1(table: &mut toml::Table) {
    let Some(toml::Value::Table(mut defaults)) = table.remove("defaults") else {
        return;
    };
    tracing::debug!(to = SCHEMA_VERSION, "upgrading schema 1 config");

    if let Some(format) = defaults.remove("output") {
        let mut output = toml::Table::new();
        output.insert("format".into(), format);
        table.insert("output".into(), output.into());
    }
    if let Some(ms) = defaults.remove("timeout_ms").and_then(|v| v.as_integer()) {
        let mut ssh = toml::Table::new();
        ssh.insert("timeout_secs".into(), ((ms.max(1) + 999) / 1000).into());
        table.insert("ssh".into(), ssh.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (ConfigManager, TempDir) {
        let dir = TempDir::new().unwrap();
        (ConfigManager::with_path(dir.path().join(FILE_NAME)), dir)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _dir) = manager();
        let config = manager.load().unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.output.format, OutputFormat::Human);
        assert!(config.output.color);
        assert_eq!(config.ssh.timeout(), Duration::from_secs(15));
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_round_trip_keeps_profiles_and_ssh_defaults() {
        let (manager, _dir) = manager();
        let mut config = Config::default();
        config.ssh.user = Some("deploy".into());
        config.ssh.timeout_secs = 40;
        config.hosts.push(Host::new("build", "ci"));

        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn test_sections_may_be_partial() {
        let (manager, _dir) = manager();
        std::fs::write(
            manager.config_path(),
            "schema_version = 2\n[output]\nformat = \"json\"\n[ssh]\nuser = \"ops\"\n",
        )
        .unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.color);
        assert_eq!(config.ssh.user.as_deref(), Some("ops"));
        assert_eq!(config.ssh.timeout_secs, SshSettings::DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_schema_1_is_upgraded() {
        let (manager, _dir) = manager();
        std::fs::write(
            manager.config_path(),
            concat!(
                "schema_version = 1\n",
                "[defaults]\noutput = \"json\"\ntimeout_ms = 2500\n",
                "[[hosts]]\nname = \"build\"\nuser = \"ci\"\n",
            ),
        )
        .unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.ssh.timeout_secs, 3);
        assert_eq!(config.hosts[0].port, 22);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let (manager, _dir) = manager();
        std::fs::write(manager.config_path(), "schema_version = 99\n").unwrap();
        let err = manager.load().unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("schema 99")));
    }

    #[test]
    fn test_unknown_format_is_a_parse_error() {
        let (manager, _dir) = manager();
        std::fs::write(manager.config_path(), "[output]\nformat = \"yaml\"\n").unwrap();
        assert!(matches!(manager.load(), Err(Error::TomlParse(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (manager, _dir) = manager();
        manager.save(&Config::default()).unwrap();
        let mode = std::fs::metadata(manager.config_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!manager.config_path().with_extension("toml.new").exists());
    }
}
