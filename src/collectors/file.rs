//! Filesystem collector (`file://<absolute path>`)
//!
//! Enumerates regular files matching the `include` globs (minus `exclude`)
//! and records their stat metadata and SHA-256 content digest.
//!
//! ## Enumeration
//!
//! Each include pattern is reduced to the longest literal directory prefix.
//! Patterns that can match at any depth (`**`, `{...}` alternatives, an
//! escaped separator) are walked recursively from that prefix; all others
//! only list the prefix directory itself.
//!
//! ## Assume-unchanged shortcut
//!
//! Hashing every file on every pass is the expensive part of a collection.
//! A [`ShortcutRule`] names cheap metadata fields (by default `size` and
//! `mtime`, plus `mode`, `uid` and `gid`) that, when equal to the previous
//! session's item, let the collector copy that item's fields forward and mark
//! the new item with `assume_nochange = true` instead of reading the content.
//! A rule listing only `size` and `mtime` also hides permission and owner
//! changes on its paths. Paths matching
//! `always_verify` are always hashed.
//!
//! The shortcut is opt-in: with no rules configured every file is hashed.
//! A content change that keeps size and mtime intact goes unnoticed on
//! matching paths, so only configure rules for trees where that is acceptable.

use crate::collector::{CollectContext, Collector};
use crate::error::{CollectorError, MonitorError, Result};
use crate::hasher;
use crate::types::{url_path, url_scheme, FieldMap, FieldValue, ASSUME_UNCHANGED};
use crate::utils::{get_file_metadata, mode_repr};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Fields compared by a shortcut rule unless configured otherwise
///
/// Permission and owner fields are included so that a chmod or chown always
/// forces a fresh read.
pub const DEFAULT_CHEAP_FIELDS: [&str; 5] = ["size", "mtime", "mode", "uid", "gid"];

/// Assume-unchanged rule for paths matching `pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutRule {
    /// Glob the file path must match
    pub pattern: String,
    /// Fields that must be present and equal in the previous item
    #[serde(default = "default_cheap_fields")]
    pub cheap_fields: Vec<String>,
}

fn default_cheap_fields() -> Vec<String> {
    DEFAULT_CHEAP_FIELDS.iter().map(|s| s.to_string()).collect()
}

/// Settings of the `[file]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Globs of files to monitor
    pub include: Vec<String>,
    /// Globs of files to leave out
    pub exclude: Vec<String>,
    /// Assume-unchanged rules, first match wins
    pub shortcut: Vec<ShortcutRule>,
    /// Globs of files that are always hashed
    pub always_verify: Vec<String>,
    /// Files larger than this get a `sample_hash` instead of a full `hash`
    pub sample_threshold: Option<u64>,
    /// Sample chunk size in bytes
    pub sample_size: u64,
    /// Number of sampled chunks
    pub sample_count: usize,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            include: vec!["/etc/**".to_string()],
            exclude: Vec::new(),
            shortcut: Vec::new(),
            always_verify: Vec::new(),
            sample_threshold: None,
            sample_size: 64 * 1024,
            sample_count: 16,
        }
    }
}

/// Filesystem collector
#[derive(Debug, Clone)]
pub struct FileCollector {
    settings: FileSettings,
    include: GlobSet,
    exclude: GlobSet,
    always_verify: GlobSet,
    shortcuts: Vec<(GlobMatcher, Vec<String>)>,
    flat: Vec<PathBuf>,
    deep: Vec<PathBuf>,
}

fn compile(pattern: &str) -> Result<Glob> {
    Ok(GlobBuilder::new(pattern).literal_separator(true).build()?)
}

fn compile_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    Ok(builder.build()?)
}

/// Strip whitespace and drop empty patterns
fn clean_patterns(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split include patterns into `(flat, deep)` base directories
///
/// `flat` bases are listed without recursion, `deep` ones are walked.
pub fn find_base_dirs(patterns: &[String]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut flat = BTreeSet::new();
    let mut deep = BTreeSet::new();

    for pattern in patterns {
        let mut is_deep = pattern.contains("**") || pattern.contains('{');
        let mut prefix = Vec::new();
        for part in pattern.split('/') {
            if part.ends_with('\\') {
                is_deep = true;
                break;
            }
            if part.contains(['*', '{', '[', '?']) {
                break;
            }
            prefix.push(part);
        }

        let base = match prefix.join("/") {
            p if p.is_empty() => PathBuf::from("."),
            p => PathBuf::from(p),
        };
        if is_deep {
            deep.insert(base);
        } else {
            flat.insert(base);
        }
    }

    (flat.into_iter().collect(), deep.into_iter().collect())
}

impl FileCollector {
    /// Compile the settings' patterns
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidPattern`] for a malformed glob and
    /// [`MonitorError::InvalidConfiguration`] for zero sampling parameters.
    pub fn new(settings: FileSettings) -> Result<Self> {
        if settings.sample_threshold.is_some() && (settings.sample_size == 0 || settings.sample_count == 0) {
            return Err(MonitorError::config("file.sample_size and file.sample_count must be positive"));
        }

        let include_patterns = clean_patterns(&settings.include);
        let (flat, deep) = find_base_dirs(&include_patterns);
        let include = compile_set(&include_patterns)?;
        let exclude = compile_set(&clean_patterns(&settings.exclude))?;
        let always_verify = compile_set(&clean_patterns(&settings.always_verify))?;
        let shortcuts = settings
            .shortcut
            .iter()
            .map(|rule| Ok((compile(&rule.pattern)?.compile_matcher(), rule.cheap_fields.clone())))
            .collect::<Result<Vec<_>>>()?;

        debug!(?flat, ?deep, "file collector walk destinations");
        Ok(Self {
            settings,
            include,
            exclude,
            always_verify,
            shortcuts,
            flat,
            deep,
        })
    }

    /// Configured settings
    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    /// Included, non-excluded regular files in path order
    pub fn list_paths(&self) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();

        for base in &self.flat {
            if base.is_file() {
                if self.include.is_match(base) {
                    found.insert(base.clone());
                }
                continue;
            }
            let entries = match fs::read_dir(base) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(base = %base.display(), error = %e, "cannot list directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && self.include.is_match(&path) {
                    found.insert(path);
                }
            }
        }

        for base in &self.deep {
            for entry in WalkDir::new(base).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_file() && self.include.is_match(entry.path()) {
                    found.insert(entry.into_path());
                }
            }
        }

        found
            .into_iter()
            .filter(|path| {
                let excluded = self.exclude.is_match(path);
                if excluded {
                    trace!(path = %path.display(), "excluded");
                }
                !excluded
            })
            .collect()
    }

    /// Cheap fields required by the first shortcut rule matching `path`
    fn shortcut_fields(&self, path: &Path) -> Option<&[String]> {
        if self.always_verify.is_match(path) {
            return None;
        }
        self.shortcuts
            .iter()
            .find(|(matcher, _)| matcher.is_match(path))
            .map(|(_, fields)| fields.as_slice())
    }

    /// Previous fields to carry forward, if the shortcut applies
    fn assume_unchanged(&self, url: &str, path: &Path, current: &FieldMap, ctx: &CollectContext) -> Option<FieldMap> {
        let cheap_fields = self.shortcut_fields(path)?;
        let previous = ctx.previous_item(url)?;
        if !previous.fields.contains_key("hash") && !previous.fields.contains_key("sample_hash") {
            return None;
        }
        let unchanged = cheap_fields.iter().all(|name| match (previous.get(name), current.get(name)) {
            (Some(old), Some(new)) => old == new,
            _ => false,
        });
        unchanged.then(|| previous.fields.clone())
    }

    fn content_digest(&self, path: &Path, size: Option<u64>) -> Result<(&'static str, String)> {
        match (self.settings.sample_threshold, size) {
            (Some(threshold), Some(size)) if size > threshold => {
                let digest = hasher::sample_digest_file(
                    path,
                    self.settings.sample_size,
                    self.settings.sample_count,
                    path.as_os_str().as_encoded_bytes(),
                )?;
                Ok(("sample_hash", hasher::to_hex(&digest)))
            }
            _ => Ok(("hash", hasher::to_hex(&hasher::digest_file(path)?))),
        }
    }
}

impl Collector for FileCollector {
    fn label(&self) -> &str {
        "file"
    }

    fn list_urls(&self, _ctx: &CollectContext) -> std::result::Result<Vec<String>, CollectorError> {
        let urls: Vec<String> = self
            .list_paths()
            .into_iter()
            .map(|path| format!("file://{}", path.display()))
            .collect();
        debug!(count = urls.len(), "enumerated files");
        Ok(urls)
    }

    fn get_state(&self, url: &str, ctx: &CollectContext) -> std::result::Result<FieldMap, CollectorError> {
        if url_scheme(url) != Some("file") {
            return Err(CollectorError::Unsupported(url.to_string()));
        }
        let path = Path::new(url_path(url));
        let mut fields = FieldMap::new();

        let mut size = None;
        match get_file_metadata(path) {
            Ok(meta) => {
                size = Some(meta.size);
                fields.insert("size".into(), FieldValue::Integer(meta.size as i64));
                fields.insert("mtime".into(), FieldValue::Timestamp(meta.mtime));
                fields.insert("ctime".into(), FieldValue::Timestamp(meta.ctime));
                fields.insert("mode".into(), FieldValue::Text(mode_repr(meta.mode)));
                if let Some(uid) = meta.uid {
                    fields.insert("uid".into(), uid.into());
                }
                if let Some(gid) = meta.gid {
                    fields.insert("gid".into(), gid.into());
                }

                if let Some(mut previous) = self.assume_unchanged(url, path, &fields, ctx) {
                    trace!(url = %url, "assuming unchanged");
                    previous.insert(ASSUME_UNCHANGED.into(), FieldValue::Boolean(true));
                    return Ok(previous);
                }
            }
            Err(e) => {
                fields.insert("stat_error".into(), e.to_string().into());
            }
        }

        match self.content_digest(path, size) {
            Ok((name, hex)) => {
                fields.insert(name.into(), hex.into());
            }
            Err(e) => {
                fields.insert("hash_error".into(), e.to_string().into());
            }
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Item, Session};
    use filetime::FileTime;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn settings_for(dir: &Path, include: &[&str]) -> FileSettings {
        FileSettings {
            include: include.iter().map(|p| format!("{}/{}", dir.display(), p)).collect(),
            ..FileSettings::default()
        }
    }

    #[test]
    fn test_find_base_dirs() {
        let (flat, deep) = find_base_dirs(&strings(&["/etc/*.conf", "/etc/ssh/**", "/srv/{a,b}/x", "/etc/hosts"]));
        assert_eq!(flat, vec![PathBuf::from("/etc"), PathBuf::from("/etc/hosts")]);
        assert_eq!(deep, vec![PathBuf::from("/etc/ssh"), PathBuf::from("/srv")]);

        let (flat, deep) = find_base_dirs(&strings(&["*.txt"]));
        assert_eq!(flat, vec![PathBuf::from(".")]);
        assert!(deep.is_empty());
    }

    #[test]
    fn test_list_flat_and_deep() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("conf/sub")).unwrap();
        fs::write(root.join("conf/a.conf"), "a").unwrap();
        fs::write(root.join("conf/b.txt"), "b").unwrap();
        fs::write(root.join("conf/sub/c.conf"), "c").unwrap();
        fs::create_dir_all(root.join("tree/x/y")).unwrap();
        fs::write(root.join("tree/x/y/deep"), "d").unwrap();
        fs::write(root.join("tree/skip.log"), "s").unwrap();

        let mut settings = settings_for(root, &["conf/*.conf", "tree/**"]);
        settings.exclude = vec![format!("{}/**/*.log", root.display())];
        let collector = FileCollector::new(settings).unwrap();

        let paths = collector.list_paths();
        assert_eq!(paths, vec![root.join("conf/a.conf"), root.join("tree/x/y/deep")]);

        let urls = collector.list_urls(&CollectContext::first_run(Session::open())).unwrap();
        assert_eq!(urls[0], format!("file://{}", root.join("conf/a.conf").display()));
    }

    #[test]
    fn test_single_file_include() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hosts"), "127.0.0.1 localhost\n").unwrap();
        let collector = FileCollector::new(settings_for(dir.path(), &["hosts", "missing"])).unwrap();
        assert_eq!(collector.list_paths(), vec![dir.path().join("hosts")]);
    }

    #[test]
    fn test_invalid_pattern() {
        let settings = FileSettings {
            include: strings(&["/etc/[unclosed"]),
            ..FileSettings::default()
        };
        assert!(matches!(FileCollector::new(settings), Err(MonitorError::InvalidPattern(_))));
    }

    #[test]
    fn test_get_state_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "hello").unwrap();
        let collector = FileCollector::new(settings_for(dir.path(), &["*"])).unwrap();
        let ctx = CollectContext::first_run(Session::open());
        let url = format!("file://{}", path.display());

        let fields = collector.get_state(&url, &ctx).unwrap();
        assert_eq!(fields.get("size"), Some(&FieldValue::Integer(5)));
        assert_eq!(
            fields.get("hash").and_then(|v| v.as_str()),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert!(fields.get("mtime").and_then(|v| v.as_timestamp()).is_some());
        assert!(fields.contains_key("mode"));
        assert!(!fields.contains_key(ASSUME_UNCHANGED));

        assert!(collector.get_state("command://x", &ctx).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_missing_file_records_errors() {
        let collector = FileCollector::new(FileSettings::default()).unwrap();
        let fields = collector
            .get_state("file:///nonexistent/sysdelta", &CollectContext::first_run(Session::open()))
            .unwrap();
        assert!(fields.contains_key("stat_error"));
        assert!(fields.contains_key("hash_error"));
        assert!(!fields.contains_key("size"));
    }

    #[test]
    fn test_sample_hash_above_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big");
        fs::write(&path, vec![7u8; 4096]).unwrap();
        let settings = FileSettings {
            sample_threshold: Some(1024),
            sample_size: 256,
            sample_count: 4,
            ..settings_for(dir.path(), &["*"])
        };
        let collector = FileCollector::new(settings).unwrap();
        let fields = collector
            .get_state(&format!("file://{}", path.display()), &CollectContext::first_run(Session::open()))
            .unwrap();
        assert!(fields.contains_key("sample_hash"));
        assert!(!fields.contains_key("hash"));
    }

    #[test]
    fn test_zero_sampling_rejected() {
        let settings = FileSettings {
            sample_threshold: Some(1),
            sample_size: 0,
            ..FileSettings::default()
        };
        assert!(matches!(FileCollector::new(settings), Err(MonitorError::InvalidConfiguration(_))));
    }

    fn shortcut_collector(dir: &Path, always_verify: Vec<String>) -> FileCollector {
        FileCollector::new(FileSettings {
            shortcut: vec![ShortcutRule {
                pattern: format!("{}/*", dir.display()),
                cheap_fields: default_cheap_fields(),
            }],
            always_verify,
            ..settings_for(dir, &["*"])
        })
        .unwrap()
    }

    /// Context whose previous item has the file's current fields
    fn context_after_first_pass(collector: &FileCollector, url: &str) -> CollectContext {
        let previous = Session::open();
        let fields = collector.get_state(url, &CollectContext::first_run(previous.clone())).unwrap();
        let item = Item {
            session_id: previous.id.clone(),
            url: url.to_string(),
            plugin: "file".into(),
            fields,
        };
        CollectContext::new(Session::open(), Some(previous), vec![item])
    }

    #[test]
    fn test_shortcut_carries_previous_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "aaaa").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&path, mtime).unwrap();

        let collector = shortcut_collector(dir.path(), Vec::new());
        let url = format!("file://{}", path.display());
        let ctx = context_after_first_pass(&collector, &url);
        let previous_hash = ctx.previous_item(&url).unwrap().get("hash").cloned();

        // Same size and mtime, different content: the digest is not recomputed
        fs::write(&path, "bbbb").unwrap();
        filetime::set_file_mtime(&path, mtime).unwrap();

        let fields = collector.get_state(&url, &ctx).unwrap();
        assert_eq!(fields.get(ASSUME_UNCHANGED), Some(&FieldValue::Boolean(true)));
        assert_eq!(fields.get("hash").cloned(), previous_hash);
    }

    #[cfg(unix)]
    #[test]
    fn test_shortcut_skipped_after_chmod() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "aaaa").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&path, mtime).unwrap();

        let collector = shortcut_collector(dir.path(), Vec::new());
        let url = format!("file://{}", path.display());
        let ctx = context_after_first_pass(&collector, &url);
        let previous = ctx.previous_item(&url).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        filetime::set_file_mtime(&path, mtime).unwrap();

        let fields = collector.get_state(&url, &ctx).unwrap();
        assert!(!fields.contains_key(ASSUME_UNCHANGED));
        assert_ne!(fields.get("mode"), previous.get("mode"));
        assert_eq!(fields.get("hash"), previous.get("hash"));
    }

    #[test]
    fn test_shortcut_rehashes_on_metadata_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "aaaa").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let collector = shortcut_collector(dir.path(), Vec::new());
        let url = format!("file://{}", path.display());
        let ctx = context_after_first_pass(&collector, &url);

        fs::write(&path, "bbbb").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();

        let fields = collector.get_state(&url, &ctx).unwrap();
        assert!(!fields.contains_key(ASSUME_UNCHANGED));
        assert_ne!(fields.get("hash"), ctx.previous_item(&url).unwrap().get("hash"));
    }

    #[test]
    fn test_always_verify_disables_shortcut() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "aaaa").unwrap();

        let collector = shortcut_collector(dir.path(), vec![format!("{}/f", dir.path().display())]);
        let url = format!("file://{}", path.display());
        let ctx = context_after_first_pass(&collector, &url);

        let fields = collector.get_state(&url, &ctx).unwrap();
        assert!(!fields.contains_key(ASSUME_UNCHANGED));
        assert!(fields.contains_key("hash"));
    }

    #[test]
    fn test_no_rules_no_shortcut() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "aaaa").unwrap();

        let collector = FileCollector::new(settings_for(dir.path(), &["*"])).unwrap();
        let url = format!("file://{}", path.display());
        let ctx = context_after_first_pass(&collector, &url);
        assert!(!collector.get_state(&url, &ctx).unwrap().contains_key(ASSUME_UNCHANGED));
    }
}
