//! Output formatting utilities
//!
//! Formatters for CLI output in both human-readable and JSON formats.

mod formatter;

use afs_core::config::{OutputFormat, OutputSettings};

pub use formatter::Formatter;

/// Output switches after merging command-line flags over the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub json: bool,
    pub color: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

impl OutputConfig {
    /// Flags can only switch JSON on and colors off
    pub fn resolve(json: bool, no_color: bool, quiet: bool, settings: &OutputSettings) -> Self {
        let json = json || settings.format == OutputFormat::Json;
        Self {
            json,
            color: settings.color && !no_color && !json,
            quiet,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::resolve(false, false, false, &OutputSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_merges_flags_over_settings() {
        let settings = OutputSettings {
            format: OutputFormat::Json,
            color: true,
        };
        let config = OutputConfig::resolve(false, false, true, &settings);
        assert!(config.json);
        assert!(!config.color);
        assert!(config.quiet);

        let settings = OutputSettings::default();
        assert!(OutputConfig::resolve(false, false, false, &settings).color);
        assert!(!OutputConfig::resolve(false, true, false, &settings).color);

        let settings = OutputSettings {
            color: false,
            ..Default::default()
        };
        let config = OutputConfig::resolve(false, false, false, &settings);
        assert!(!config.json);
        assert!(!config.color);
    }
}
