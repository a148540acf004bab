//! Main test module for sysdelta
//!
//! This module includes all test suites:
//! - Integration tests driving full collect/diff/cleanup passes
//! - Property-based tests for the comparison and hashing invariants

pub mod integration;
pub mod property;

pub use integration::MonitorTestHarness;

#[cfg(test)]
mod edge_cases {
    use super::MonitorTestHarness;
    use ::sysdelta::*;
    use std::fs;

    #[test]
    fn test_empty_directory() {
        let mut h = MonitorTestHarness::new();
        let first = h.collect();
        assert_eq!(first.items, 0);

        h.write("file.txt", "content");
        h.collect();

        let (report, diff) = h.diff();
        assert_eq!(diff.found.len(), 1);
        assert!(diff.found.contains(&h.url("file.txt")));
        assert!(!report.is_empty);
    }

    #[test]
    fn test_special_filenames() {
        let mut h = MonitorTestHarness::new();
        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "文件.txt",
            "файл.txt",
            ".hidden",
        ];
        for name in &names {
            h.write(name, "v1\n");
        }
        h.collect();
        for name in &names {
            h.write(name, "v2\n");
        }
        h.collect();

        let (_, diff) = h.diff();
        assert_eq!(diff.common.len(), names.len());
        for name in &names {
            let changed = diff.diff_for(&h.url(name)).unwrap();
            assert!(changed.changed_keys().contains("hash"), "{}", name);
        }
    }

    #[test]
    fn test_deeply_nested_and_excluded_paths() {
        let mut h = MonitorTestHarness::with_config(|root, config| {
            config.file.exclude = vec![format!("{}/skip/**", root.display())];
        });
        let deep = (0..20).map(|i| format!("d{}", i)).collect::<Vec<_>>().join("/");
        h.write(&format!("{}/leaf.conf", deep), "leaf\n");
        h.write("skip/ignored.conf", "ignored\n");
        h.collect();

        let session = h.monitor.store().last_closed_session().unwrap().unwrap();
        let urls = h.monitor.store().urls_for_session(&session.id).unwrap();
        assert_eq!(urls, vec![h.url(&format!("{}/leaf.conf", deep))]);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_change_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let mut h = MonitorTestHarness::new();
        h.write("script.sh", "#!/bin/sh\n");
        fs::set_permissions(h.path("script.sh"), fs::Permissions::from_mode(0o644)).unwrap();
        h.collect();
        fs::set_permissions(h.path("script.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        h.collect();

        let (report, diff) = h.diff();
        let changed = diff.diff_for(&h.url("script.sh")).unwrap();
        assert!(changed.changed.contains_key("mode"));
        assert!(!changed.changed.contains_key("hash"));
        assert!(report.text.contains("!!! mode:"));
    }
}
