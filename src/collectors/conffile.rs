//! Configuration file content collector
//!
//! Does not own any resource. During `process_state` it attaches the raw
//! `content` of small text files collected by the file collector, so that
//! changed configuration files show up as line patches in reports.

use crate::collector::Collector;
use crate::error::{CollectorError, Result};
use crate::types::{url_path, FieldValue, Item};
use crate::utils::is_binary_file;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

/// Settings of the `[conffile]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConffileSettings {
    /// Files larger than this many bytes are skipped
    pub size_limit: u64,
    /// Globs of files whose content is never stored
    pub exclude: Vec<String>,
}

impl Default for ConffileSettings {
    fn default() -> Self {
        Self {
            size_limit: 100 * 1024,
            exclude: vec!["/etc/shadow*".to_string(), "/etc/gshadow*".to_string()],
        }
    }
}

/// Attaches file content to `file://` items
#[derive(Debug, Clone)]
pub struct ConffileCollector {
    size_limit: u64,
    exclude: GlobSet,
}

impl ConffileCollector {
    /// Compile the exclude patterns
    pub fn new(settings: ConffileSettings) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in settings.exclude.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            size_limit: settings.size_limit,
            exclude: builder.build()?,
        })
    }

    fn wants(&self, item: &Item, path: &Path) -> bool {
        if item.is_assumed_unchanged() {
            return false;
        }
        if let Some(size) = item.get("size").and_then(FieldValue::as_i64) {
            if size < 0 || size as u64 > self.size_limit {
                debug!(path = %path.display(), "above size limit - skipping");
                return false;
            }
        }
        if self.exclude.is_match(path) {
            debug!(path = %path.display(), "excluded");
            return false;
        }
        true
    }
}

impl Collector for ConffileCollector {
    fn label(&self) -> &str {
        "conffile"
    }

    fn process_state(&self, item: &mut Item) -> std::result::Result<(), CollectorError> {
        if item.scheme() != Some("file") {
            return Ok(());
        }
        let path = Path::new(url_path(&item.url)).to_path_buf();
        if !self.wants(item, &path) {
            return Ok(());
        }

        let content = is_binary_file(&path).and_then(|binary| {
            if binary {
                Ok(None)
            } else {
                fs::read(&path).map(Some)
            }
        });
        match content {
            Ok(Some(bytes)) => {
                trace!(path = %path.display(), len = bytes.len(), "read content");
                item.set("content", bytes);
            }
            Ok(None) => debug!(path = %path.display(), "seems to be binary - skipping"),
            Err(e) => {
                item.set("content_error", e.to_string());
            }
        }
        Ok(())
    }
}
