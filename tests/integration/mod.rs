//! End-to-end tests for sysdelta
//!
//! Drives real collection, diff and retention passes against a temporary
//! directory tree and an on-disk snapshot database.

use ::sysdelta::*;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A watched directory plus a monitor backed by a database outside of it
pub struct MonitorTestHarness {
    pub root: TempDir,
    pub db_dir: TempDir,
    pub config: MonitorConfig,
    pub monitor: Monitor,
}

impl MonitorTestHarness {
    /// File and conffile collectors watching the whole temporary tree
    pub fn new() -> Self {
        Self::with_config(|_, _| {})
    }

    /// Like [`MonitorTestHarness::new`], with configuration tweaks applied
    pub fn with_config(tweak: impl FnOnce(&Path, &mut MonitorConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();

        let mut config = MonitorConfig::default();
        config.storage.db_path = db_dir.path().join("snapshots.db");
        config.monitor.collectors = vec!["file".to_string(), "conffile".to_string()];
        config.monitor.hostname = Some("harness".to_string());
        config.monitor.parallel_workers = Some(2);
        config.file.include = vec![format!("{}/**", root.path().display())];
        config.conffile.exclude = Vec::new();
        tweak(root.path(), &mut config);
        config.validate().unwrap();

        let monitor = config.builder().unwrap().build(&config.storage.db_path).unwrap();
        Self {
            root,
            db_dir,
            config,
            monitor,
        }
    }

    /// Rebuild the monitor from the current configuration and database
    pub fn reopen(&mut self) {
        self.monitor = self
            .config
            .builder()
            .unwrap()
            .build(&self.config.storage.db_path)
            .unwrap();
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn url(&self, rel: &str) -> String {
        format!("file://{}", self.path(rel).display())
    }

    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    pub fn collect(&mut self) -> CollectSummary {
        self.monitor.collect().unwrap()
    }

    /// Diff the two newest sessions, which must exist
    pub fn diff(&mut self) -> (Report, SessionDiff) {
        match self.monitor.diff().unwrap() {
            DiffOutcome::Created { report, diff } => (report, *diff),
            DiffOutcome::NoPreviousState => panic!("expected two closed sessions"),
        }
    }
}

impl Default for MonitorTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_first_diff_has_no_previous_state() {
        let mut h = MonitorTestHarness::new();
        h.write("a.conf", "x = 1\n");

        assert!(matches!(h.monitor.diff().unwrap(), DiffOutcome::NoPreviousState));
        h.collect();
        assert!(matches!(h.monitor.diff().unwrap(), DiffOutcome::NoPreviousState));
        assert_eq!(h.monitor.store().stats().unwrap().reports, 0);
    }

    #[test]
    fn test_size_change_is_reported() {
        let mut h = MonitorTestHarness::new();
        h.write("data", "0123456789");
        h.collect();
        h.write("data", "01234567890123456789");
        h.collect();

        let (report, diff) = h.diff();
        assert!(!report.is_empty);
        assert!(diff.found.is_empty() && diff.lost.is_empty());

        let changed = diff.diff_for(&h.url("data")).unwrap();
        assert_eq!(
            changed.changed.get("size"),
            Some(&(FieldValue::Integer(10), FieldValue::Integer(20)))
        );
        assert!(changed.changed.contains_key("hash"));
        assert!(report.text.contains("!!! size: (-) 10 != (+) 20"));
        assert!(report.text.starts_with("system changes on harness\n"));
    }

    #[test]
    fn test_lost_and_found() {
        let mut h = MonitorTestHarness::new();
        h.write("old.conf", "a\n");
        h.write("kept.conf", "k\n");
        h.collect();
        h.remove("old.conf");
        h.write("sub/new.conf", "b\n");
        h.collect();

        let (report, diff) = h.diff();
        assert_eq!(diff.lost.iter().cloned().collect::<Vec<_>>(), vec![h.url("old.conf")]);
        assert_eq!(diff.found.iter().cloned().collect::<Vec<_>>(), vec![h.url("sub/new.conf")]);
        assert_eq!(diff.common.len(), 1);
        assert!(diff.diffs.is_empty());
        assert!(report.text.contains(&format!("  {}\n", h.url("old.conf"))));
    }

    #[test]
    fn test_unchanged_tree_gives_empty_report() {
        let mut h = MonitorTestHarness::new();
        h.write("a.conf", "a\n");
        h.write("b.conf", "b\n");
        h.collect();
        h.collect();

        let (report, diff) = h.diff();
        assert!(diff.is_empty());
        assert!(report.is_empty);
        assert!(report.text.contains("= no difference"));
    }

    #[test]
    fn test_config_file_change_produces_patch() {
        let mut h = MonitorTestHarness::new();
        h.write("app.conf", "host = a\nport = 80\nuser = www\n");
        h.collect();
        h.write("app.conf", "host = a\nport = 8080\nuser = www\n");
        h.collect();

        let (report, diff) = h.diff();
        let changed = diff.diff_for(&h.url("app.conf")).unwrap();
        let patch = changed.patches.get("content").unwrap();
        assert!(patch.starts_with("@@ -1,3 +1,3 @@\n"));
        assert!(patch.contains("\n-port = 80\n+port = 8080\n"));
        assert!(report.text.contains("!!! content:\n"));
    }

    #[test]
    fn test_binary_and_oversized_files_have_no_content() {
        let mut h = MonitorTestHarness::with_config(|_, config| config.conffile.size_limit = 16);
        h.write("blob.bin", b"\x00\x01\x02\x03");
        h.write("big.conf", "x".repeat(64));
        h.write("small.conf", "ok\n");
        let summary = h.collect();

        let store = h.monitor.store();
        let item = |rel: &str| store.item(&summary.session.id, &h.url(rel)).unwrap().unwrap();
        assert!(item("blob.bin").get("content").is_none());
        assert!(item("big.conf").get("content").is_none());
        assert_eq!(item("small.conf").get("content"), Some(&FieldValue::Bytes(b"ok\n".to_vec())));
    }

    #[test]
    fn test_assume_unchanged_shortcut_hides_same_metadata_rewrite() {
        let mut h = MonitorTestHarness::with_config(|root, config| {
            config.file.shortcut = vec![sysdelta::collectors::ShortcutRule {
                pattern: format!("{}/**", root.display()),
                cheap_fields: vec!["size".to_string(), "mtime".to_string()],
            }];
        });
        let mtime = FileTime::from_unix_time(1_700_000_000, 0);
        h.write("lib.so", "aaaa");
        filetime::set_file_mtime(h.path("lib.so"), mtime).unwrap();
        let first = h.collect();
        assert_eq!(first.assumed_unchanged, 0);

        // Same size and mtime: the content is not read again
        h.write("lib.so", "bbbb");
        filetime::set_file_mtime(h.path("lib.so"), mtime).unwrap();
        let second = h.collect();
        assert_eq!(second.assumed_unchanged, 1);

        let item = h.monitor.store().item(&second.session.id, &h.url("lib.so")).unwrap().unwrap();
        assert!(item.is_assumed_unchanged());
        assert_eq!(item.get("content"), Some(&FieldValue::Bytes(b"aaaa".to_vec())));

        let (report, diff) = h.diff();
        assert!(diff.is_empty());
        assert!(report.is_empty);
    }

    #[test]
    fn test_always_verify_overrides_shortcut() {
        let mut h = MonitorTestHarness::with_config(|root, config| {
            config.file.shortcut = vec![sysdelta::collectors::ShortcutRule {
                pattern: format!("{}/**", root.display()),
                cheap_fields: vec!["size".to_string(), "mtime".to_string()],
            }];
            config.file.always_verify = vec![format!("{}/critical", root.display())];
        });
        let mtime = FileTime::from_unix_time(1_700_000_000, 0);
        h.write("critical", "aaaa");
        filetime::set_file_mtime(h.path("critical"), mtime).unwrap();
        h.collect();
        h.write("critical", "bbbb");
        filetime::set_file_mtime(h.path("critical"), mtime).unwrap();
        assert_eq!(h.collect().assumed_unchanged, 0);

        let (_, diff) = h.diff();
        assert!(diff.diff_for(&h.url("critical")).unwrap().changed.contains_key("hash"));
    }

    #[test]
    fn test_retention_keeps_two_newest_of_five() {
        let mut h = MonitorTestHarness::with_config(|_, config| {
            config.retention.session_keep = 2;
            config.retention.report_keep = 2;
        });
        let mut ids = Vec::new();
        for i in 0..5 {
            h.write("counter", i.to_string());
            ids.push(h.collect().session.id);
            h.monitor.diff().unwrap();
        }

        let stats = h.monitor.cleanup().unwrap();
        assert_eq!(stats.sessions_deleted, 3);
        assert_eq!(stats.reports_deleted, 2);

        let store = h.monitor.store();
        let left: Vec<String> = store.sessions().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(left, vec![ids[4].clone(), ids[3].clone()]);
        for old in &ids[..3] {
            assert!(store.items_for_session(old).unwrap().is_empty());
        }
        assert_eq!(store.stats().unwrap().items, 2);
    }

    #[test]
    fn test_interrupted_pass_is_ignored_and_cleaned() {
        let mut h = MonitorTestHarness::new();
        h.write("a.conf", "a\n");
        h.collect();
        h.collect();

        // An open session left behind by a crashed pass
        let mut stale = Session::open();
        stale.hostname = Some("harness".into());
        h.monitor.store().save_session(&stale).unwrap();

        let (_, diff) = h.diff();
        assert_ne!(diff.new.id, stale.id);
        assert_ne!(diff.old.id, stale.id);

        assert_eq!(h.monitor.cleanup().unwrap().sessions_deleted, 1);
        assert!(h.monitor.store().session(&stale.id).unwrap().is_none());
    }

    #[test]
    fn test_state_survives_reopen() {
        let mut h = MonitorTestHarness::new();
        h.write("a.conf", "v1\n");
        h.collect();

        h.reopen();
        h.write("a.conf", "v2\n");
        h.collect();
        let (report, _) = h.diff();

        h.reopen();
        assert_eq!(h.monitor.last_report().unwrap().unwrap().id, report.id);
    }

    #[test]
    fn test_item_upsert_is_idempotent_on_disk() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("store.db");

        let mut session = Session::open();
        session.close(1);
        let item = Item::new(&session.id, "file:///etc/hosts", "file")
            .with_field("size", 12i64)
            .with_field("content", b"127.0.0.1\n".to_vec());
        {
            let store = SnapshotStore::open(&db).unwrap();
            store.save_session(&session).unwrap();
            store.save_item(&item).unwrap();
            store.save_item(&item).unwrap();
        }

        let store = SnapshotStore::open(&db).unwrap();
        assert_eq!(store.item_count(&session.id).unwrap(), 1);
        assert_eq!(store.item(&session.id, "file:///etc/hosts").unwrap(), Some(item));
    }

    #[test]
    fn test_delete_session_removes_only_its_items() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("store.db")).unwrap();
        let (mut s1, mut s2) = (Session::open(), Session::open());
        s1.close(1);
        s2.close(1);
        for s in [&s1, &s2] {
            store.save_session(s).unwrap();
            store.save_item(&Item::new(&s.id, "file:///a", "file").with_field("size", 1i64)).unwrap();
        }

        assert!(store.delete_session(&s1.id).unwrap());
        assert!(store.session(&s1.id).unwrap().is_none());
        assert!(store.items_for_session(&s1.id).unwrap().is_empty());
        assert_eq!(store.items_for_session(&s2.id).unwrap().len(), 1);
        assert!(!store.delete_session(&s1.id).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_change() {
        let mut h = MonitorTestHarness::with_config(|_, config| {
            config.monitor.collectors.push("command".to_string());
            config.command.commands.insert("greeting".to_string(), "echo hello".to_string());
        });
        h.collect();

        h.config.command.commands.insert("greeting".to_string(), "echo world".to_string());
        h.reopen();
        h.collect();

        let (report, diff) = h.diff();
        let changed = diff.diff_for("command://greeting").unwrap();
        assert!(changed.patches.get("stdout").unwrap().contains("-hello\n+world\n"));
        assert!(report.text.contains("!!! stdout:\n"));
    }

    /// Post-processor that fails on every item while `failing` is set
    struct FlakyPostProcessor {
        failing: Arc<AtomicBool>,
    }

    impl Collector for FlakyPostProcessor {
        fn label(&self) -> &str {
            "flaky"
        }

        fn process_state(&self, _item: &mut Item) -> std::result::Result<(), CollectorError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollectorError::Failed("checksum service unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_process_state_failure_is_recorded_and_reported() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.conf"), "a\n").unwrap();
        let url = format!("file://{}", root.path().join("a.conf").display());

        let failing = Arc::new(AtomicBool::new(false));
        let settings = sysdelta::collectors::FileSettings {
            include: vec![format!("{}/**", root.path().display())],
            ..Default::default()
        };
        let mut monitor = MonitorBuilder::new()
            .hostname("harness")
            .collector(sysdelta::collectors::FileCollector::new(settings).unwrap())
            .collector(FlakyPostProcessor {
                failing: Arc::clone(&failing),
            })
            .build_in_memory()
            .unwrap();

        monitor.collect().unwrap();
        failing.store(true, Ordering::SeqCst);
        let summary = monitor.collect().unwrap();

        let item = monitor.store().item(&summary.session.id, &url).unwrap().unwrap();
        assert_eq!(
            item.get("flaky_error"),
            Some(&FieldValue::Text("checksum service unavailable".to_string()))
        );
        assert!(item.get("hash").is_some());

        let DiffOutcome::Created { report, diff } = monitor.diff().unwrap() else {
            panic!("expected a report");
        };
        let changed = diff.diff_for(&url).unwrap();
        assert!(changed.only_b.contains_key("flaky_error"));
        assert!(!report.is_empty);
    }
}
