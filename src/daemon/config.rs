// src/daemon/config.rs

//! Daemon configuration
//!
//! Read from a TOML file with three sections, all optional:
//!
//! ```toml
//! [daemon]
//! idle_timeout = 20         # ticks before an unlocked daemon exits
//! locked_timeout = 600      # ticks before an abandoned lock is reclaimed
//! tick_ms = 1000
//! watchdog = true
//! max_download_errors = 100 # used when RunTransaction gets a negative limit
//!
//! [auth]
//! require_polkit = true
//! audit_entries = 1000      # authorization decisions kept in memory
//!
//! [engine]
//! catalog = "/etc/dnfdaemon/catalog.toml"
//! ```

use super::BusKind;
use super::watchdog::{DEFAULT_IDLE_THRESHOLD, DEFAULT_LOCKED_THRESHOLD, DEFAULT_TICK};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// System-wide configuration file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dnfdaemon/dnfdaemon.toml";
/// Catalog used when none is configured
pub const DEFAULT_CATALOG_PATH: &str = "/etc/dnfdaemon/catalog.toml";

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub auth: AuthSection,
    pub engine: EngineSection,
}

/// Session and watchdog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Watchdog ticks an unlocked daemon may stay idle
    pub idle_timeout: u32,
    /// Watchdog ticks a locked session may stay idle
    pub locked_timeout: u32,
    /// Watchdog tick interval in milliseconds
    pub tick_ms: u64,
    /// Start with the watchdog enabled
    pub watchdog: bool,
    /// Download error budget when the client does not pass one
    pub max_download_errors: u32,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_THRESHOLD,
            locked_timeout: DEFAULT_LOCKED_THRESHOLD,
            tick_ms: DEFAULT_TICK.as_millis() as u64,
            watchdog: true,
            max_download_errors: 100,
        }
    }
}

/// Authorization settings (system bus only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Ask PolicyKit; when false every caller is trusted
    pub require_polkit: bool,
    /// Audit entries kept in memory
    pub audit_entries: usize,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            require_polkit: true,
            audit_entries: 1000,
        }
    }
}

/// Package engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Catalog backing the in-process engine
    pub catalog: PathBuf,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from(DEFAULT_CATALOG_PATH),
        }
    }
}

impl DaemonConfig {
    /// Parse configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Default location of the configuration file for a bus
    pub fn default_path(bus: BusKind) -> PathBuf {
        match bus {
            BusKind::System => PathBuf::from(SYSTEM_CONFIG_PATH),
            BusKind::Session => dirs::config_dir()
                .map(|dir| dir.join("dnfdaemon").join("dnfdaemon.toml"))
                .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH)),
        }
    }

    /// Load `path` if given (it must exist), else the default file if present
    pub fn discover(path: Option<&Path>, bus: BusKind) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default = Self::default_path(bus);
        if default.exists() {
            Self::load(&default)
        } else {
            debug!("No configuration at {}, using defaults", default.display());
            Ok(Self::default())
        }
    }

    /// Override the catalog path
    pub fn with_catalog<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.engine.catalog = path.into();
        self
    }

    /// Enable or disable the watchdog
    pub fn with_watchdog(mut self, enabled: bool) -> Self {
        self.daemon.watchdog = enabled;
        self
    }

    /// Watchdog tick interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.tick_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.daemon.idle_timeout, 20);
        assert_eq!(config.daemon.locked_timeout, 600);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert!(config.daemon.watchdog);
        assert!(config.auth.require_polkit);
        assert_eq!(config.auth.audit_entries, 1000);
        assert_eq!(config.engine.catalog, PathBuf::from(DEFAULT_CATALOG_PATH));
    }

    #[test]
    fn test_partial_file() {
        let config = DaemonConfig::from_toml(
            r#"
[daemon]
idle_timeout = 5

[engine]
catalog = "/tmp/catalog.toml"
"#,
        )
        .unwrap();
        assert_eq!(config.daemon.idle_timeout, 5);
        assert_eq!(config.daemon.locked_timeout, 600);
        assert!(config.auth.require_polkit);
        assert_eq!(config.engine.catalog, PathBuf::from("/tmp/catalog.toml"));
    }

    #[test]
    fn test_invalid_file() {
        let err = DaemonConfig::from_toml("[daemon]\nidle_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth]\nrequire_polkit = false").unwrap();

        let config = DaemonConfig::discover(Some(file.path()), BusKind::System).unwrap();
        assert!(!config.auth.require_polkit);

        let missing = DaemonConfig::discover(Some(Path::new("/nonexistent/x.toml")), BusKind::System);
        assert!(missing.is_err());
    }

    #[test]
    fn test_builders() {
        let config = DaemonConfig::default()
            .with_catalog("/srv/catalog.toml")
            .with_watchdog(false);
        assert_eq!(config.engine.catalog, PathBuf::from("/srv/catalog.toml"));
        assert!(!config.daemon.watchdog);
    }
}
