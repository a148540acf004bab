//! Host metadata collector (`sysinfo://`)

use crate::collector::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::types::{url_scheme, FieldMap, FieldValue};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const URL: &str = "sysinfo://";

/// Records host name, OS and kernel identification as a single resource
#[derive(Debug, Clone)]
pub struct SysinfoCollector {
    os_release: PathBuf,
    proc_kernel: PathBuf,
}

impl Default for SysinfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoCollector {
    /// Collector reading the standard system locations
    pub fn new() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
            proc_kernel: PathBuf::from("/proc/sys/kernel"),
        }
    }

    /// Read distribution info from another `os-release` file
    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    /// Read kernel release and version from another directory
    pub fn with_proc_kernel(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_kernel = path.into();
        self
    }

    fn read_kernel(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.proc_kernel.join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Parse `KEY=value` lines of an os-release file, unquoting values
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

impl Collector for SysinfoCollector {
    fn label(&self) -> &str {
        "sysinfo"
    }

    fn list_urls(&self, _ctx: &CollectContext) -> Result<Vec<String>, CollectorError> {
        Ok(vec![URL.to_string()])
    }

    fn get_state(&self, url: &str, _ctx: &CollectContext) -> Result<FieldMap, CollectorError> {
        if url_scheme(url) != Some("sysinfo") {
            return Err(CollectorError::Unsupported(url.to_string()));
        }

        let mut fields = FieldMap::new();
        let hostname = hostname::get()?.to_string_lossy().into_owned();
        fields.insert("hostname".into(), FieldValue::Text(hostname));
        fields.insert("system".into(), std::env::consts::OS.into());
        fields.insert("machine".into(), std::env::consts::ARCH.into());

        let release = self.read_kernel("osrelease");
        if let Some(release) = &release {
            fields.insert("release".into(), release.as_str().into());
        }
        if let Some(version) = self.read_kernel("version") {
            fields.insert("version".into(), version.into());
        }
        let platform = match &release {
            Some(r) => format!("{}-{}-{}", std::env::consts::OS, r, std::env::consts::ARCH),
            None => format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        };
        fields.insert("platform".into(), platform.into());

        if let Ok(content) = fs::read_to_string(&self.os_release) {
            let os = parse_os_release(&content);
            for (key, field) in [("NAME", "linux_distname"), ("VERSION_ID", "linux_version"), ("ID", "linuxid")] {
                if let Some(value) = os.get(key) {
                    fields.insert(field.into(), value.as_str().into());
                }
            }
        }

        Ok(fields)
    }
}
