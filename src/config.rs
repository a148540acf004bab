//! TOML configuration
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup that watches `/etc`:
//!
//! ```toml
//! [storage]
//! db_path = "/var/lib/sysdelta/snapshots.db"
//!
//! [retention]
//! session_keep = 10
//! report_keep = 10
//!
//! [monitor]
//! collectors = ["sysinfo", "file", "conffile", "command", "wtmp"]
//!
//! [file]
//! include = ["/etc/**"]
//! exclude = ["/etc/*.lock"]
//!
//! [[file.shortcut]]
//! pattern = "/usr/**"
//! cheap_fields = ["size", "mtime"]
//!
//! [command.commands]
//! packages = "dpkg -l"
//! ```

use crate::collectors::{build_collectors, CommandSettings, ConffileSettings, FileSettings, WtmpSettings};
use crate::error::{MonitorError, Result};
use crate::monitor::MonitorBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file read when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sysdelta/sysdelta.toml";

/// Default location of the snapshot database
pub const DEFAULT_DB_PATH: &str = "/var/lib/sysdelta/snapshots.db";

// =============================================================================
// Sections
// =============================================================================

/// Snapshot store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

/// Retention limits applied by the cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Closed sessions to keep (at least 2)
    pub session_keep: usize,
    /// Reports to keep
    pub report_keep: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            session_keep: 10,
            report_keep: 10,
        }
    }
}

/// Monitor-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Enabled collectors, in invocation order
    pub collectors: Vec<String>,
    /// Host name recorded on sessions (machine name when unset)
    pub hostname: Option<String>,
    /// Threads used to collect resource state (CPU count when unset)
    pub parallel_workers: Option<usize>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            collectors: crate::collectors::BUILTIN.iter().map(|s| s.to_string()).collect(),
            hostname: None,
            parallel_workers: None,
        }
    }
}

// =============================================================================
// Top-level configuration
// =============================================================================

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub monitor: MonitorSection,
    pub file: FileSettings,
    pub conffile: ConffileSettings,
    pub command: CommandSettings,
    pub wtmp: WtmpSettings,
}

impl MonitorConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, the defaults otherwise
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// Returns [`MonitorError::InvalidConfiguration`] if any field is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.retention.session_keep < 2 {
            return Err(MonitorError::config("retention.session_keep must be at least 2"));
        }
        if self.monitor.parallel_workers == Some(0) {
            return Err(MonitorError::config("monitor.parallel_workers must be positive"));
        }
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(MonitorError::config("storage.db_path must not be empty"));
        }
        for (name, command) in &self.command.commands {
            if name.is_empty() || name.contains('/') {
                return Err(MonitorError::config(format!("invalid command name {:?}", name)));
            }
            if command.trim().is_empty() {
                return Err(MonitorError::config(format!("command '{}' is empty", name)));
            }
        }
        Ok(())
    }

    /// A builder with the configured collectors and settings
    ///
    /// The store is not opened; call [`MonitorBuilder::build`] with
    /// `storage.db_path` (or another path).
    pub fn builder(&self) -> Result<MonitorBuilder> {
        let mut builder = MonitorBuilder::new()
            .collectors(build_collectors(self)?)
            .session_keep(self.retention.session_keep)
            .report_keep(self.retention.report_keep);
        if let Some(hostname) = &self.monitor.hostname {
            builder = builder.hostname(hostname.clone());
        }
        if let Some(workers) = self.monitor.parallel_workers {
            builder = builder.parallel_workers(workers);
        }
        Ok(builder)
    }
}
