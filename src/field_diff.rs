//! Key-level comparison of two field maps
//!
//! [`FieldDiff::compute`] sorts every key of two [`FieldMap`]s into one of
//! four buckets: only on the old side, only on the new side, equal, or
//! changed. Changed multi-line text is stored as a line patch rather than as
//! a pair of full values.
//!
//! ```rust
//! use sysdelta::field_diff::FieldDiff;
//! use sysdelta::types::{FieldMap, FieldValue};
//!
//! let mut a = FieldMap::new();
//! a.insert("size".into(), FieldValue::Integer(10));
//! let mut b = FieldMap::new();
//! b.insert("size".into(), FieldValue::Integer(20));
//!
//! let diff = FieldDiff::compute(&a, "file:///a", &b, "file:///a", &[]);
//! assert!(!diff.is_empty());
//! assert_eq!(diff.to_string(), "--- file:///a\n+++ file:///a\n!!! size: (-) 10 != (+) 20\n");
//! ```

use crate::diff::{unified_patch, DiffOptions};
use crate::types::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Result of comparing two field maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Label of the old side
    pub label_a: String,
    /// Label of the new side
    pub label_b: String,
    /// Keys present only in the old map
    pub only_a: FieldMap,
    /// Keys present only in the new map
    pub only_b: FieldMap,
    /// Keys with equal values on both sides
    pub equal: BTreeSet<String>,
    /// Scalar changes as `(old, new)`
    pub changed: BTreeMap<String, (FieldValue, FieldValue)>,
    /// Multi-line text changes as patch text
    pub patches: BTreeMap<String, String>,
}

impl FieldDiff {
    /// Compare `a` (old, labelled `label_a`) with `b` (new, labelled `label_b`)
    ///
    /// Keys listed in `ignored` are left out of every bucket. Byte values are
    /// decoded as UTF-8 (invalid sequences replaced) before comparison, so
    /// two blobs that decode to the same text count as equal.
    pub fn compute(a: &FieldMap, label_a: &str, b: &FieldMap, label_b: &str, ignored: &[&str]) -> Self {
        Self::compute_with(a, label_a, b, label_b, ignored, &DiffOptions::default())
    }

    /// [`FieldDiff::compute`] with explicit line-diff options
    pub fn compute_with(
        a: &FieldMap,
        label_a: &str,
        b: &FieldMap,
        label_b: &str,
        ignored: &[&str],
        options: &DiffOptions,
    ) -> Self {
        let keep = |k: &&String| !ignored.contains(&k.as_str());

        let mut diff = FieldDiff {
            label_a: label_a.to_string(),
            label_b: label_b.to_string(),
            only_a: FieldMap::new(),
            only_b: FieldMap::new(),
            equal: BTreeSet::new(),
            changed: BTreeMap::new(),
            patches: BTreeMap::new(),
        };

        for (key, old) in a.iter().filter(|(k, _)| keep(k)) {
            match b.get(key) {
                None => {
                    diff.only_a.insert(key.clone(), old.clone());
                }
                Some(new) => diff.classify(key, old, new, options),
            }
        }
        for (key, new) in b.iter().filter(|(k, _)| keep(k)) {
            if !a.contains_key(key) {
                diff.only_b.insert(key.clone(), new.clone());
            }
        }

        diff
    }

    fn classify(&mut self, key: &str, old: &FieldValue, new: &FieldValue, options: &DiffOptions) {
        if old == new {
            self.equal.insert(key.to_string());
            return;
        }

        let (old, new) = if old.is_bytes() || new.is_bytes() {
            let (old_text, new_text) = (old.to_text(), new.to_text());
            if old_text == new_text {
                if old.is_bytes() && new.is_bytes() {
                    // Distinct invalid sequences that decode to the same replacement text
                    self.changed.insert(key.to_string(), (old.clone(), new.clone()));
                } else {
                    self.equal.insert(key.to_string());
                }
                return;
            }
            (FieldValue::Text(old_text), FieldValue::Text(new_text))
        } else {
            (old.clone(), new.clone())
        };

        let multi_line = |v: &FieldValue| v.as_str().is_some_and(|s| s.contains('\n'));
        if multi_line(&old) || multi_line(&new) {
            let patch = unified_patch(&old.to_text(), &new.to_text(), options);
            // Same lines, different trailing newline
            let patch = if patch.is_empty() {
                "(end of line change only)\n".to_string()
            } else {
                patch
            };
            self.patches.insert(key.to_string(), patch);
        } else {
            self.changed.insert(key.to_string(), (old, new));
        }
    }

    /// True iff nothing differs between the two maps
    pub fn is_empty(&self) -> bool {
        self.only_a.is_empty() && self.only_b.is_empty() && self.changed.is_empty() && self.patches.is_empty()
    }

    /// Number of differing keys
    pub fn change_count(&self) -> usize {
        self.only_a.len() + self.only_b.len() + self.changed.len() + self.patches.len()
    }

    /// Every key that differs, sorted
    pub fn changed_keys(&self) -> BTreeSet<&str> {
        self.only_a
            .keys()
            .chain(self.only_b.keys())
            .chain(self.changed.keys())
            .chain(self.patches.keys())
            .map(String::as_str)
            .collect()
    }
}

fn indent(text: &str) -> String {
    text.trim_end_matches('\n').replace('\n', "\n    ")
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {}", self.label_a)?;
        for (k, v) in &self.only_a {
            writeln!(f, "    {}: {}", k, indent(&v.to_text()))?;
        }
        writeln!(f, "+++ {}", self.label_b)?;
        for (k, v) in &self.only_b {
            writeln!(f, "    {}: {}", k, indent(&v.to_text()))?;
        }
        for (k, (old, new)) in &self.changed {
            writeln!(f, "!!! {}: (-) {} != (+) {}", k, old, new)?;
        }
        for (k, patch) in &self.patches {
            writeln!(f, "!!! {}:", k)?;
            writeln!(f, "    {}", indent(patch))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_equal_maps_are_empty() {
        let a = map(&[("size", 10i64.into()), ("mode", "u=rw-".into())]);
        let diff = FieldDiff::compute(&a, "a", &a.clone(), "b", &[]);
        assert!(diff.is_empty());
        assert_eq!(diff.equal.len(), 2);
    }

    #[test]
    fn test_only_and_changed() {
        let a = map(&[("gone", 1i64.into()), ("size", 10i64.into()), ("same", true.into())]);
        let b = map(&[("new", "x".into()), ("size", 20i64.into()), ("same", true.into())]);

        let diff = FieldDiff::compute(&a, "old", &b, "new", &[]);
        assert!(diff.only_a.contains_key("gone"));
        assert!(diff.only_b.contains_key("new"));
        assert_eq!(
            diff.changed.get("size"),
            Some(&(FieldValue::Integer(10), FieldValue::Integer(20)))
        );
        assert!(diff.equal.contains("same"));
        assert_eq!(diff.change_count(), 3);
        assert_eq!(diff.changed_keys().into_iter().collect::<Vec<_>>(), vec!["gone", "new", "size"]);
    }

    #[test]
    fn test_ignored_keys() {
        let a = map(&[("uuid", "1".into()), ("size", 1i64.into())]);
        let b = map(&[("uuid", "2".into()), ("size", 1i64.into()), ("assume_nochange", true.into())]);
        let diff = FieldDiff::compute(&a, "a", &b, "b", &["uuid", "assume_nochange"]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_bytes_decoded_before_compare() {
        let a = map(&[("content", FieldValue::Bytes(b"same".to_vec()))]);
        let b = map(&[("content", FieldValue::Text("same".into()))]);
        assert!(FieldDiff::compute(&a, "a", &b, "b", &[]).is_empty());

        let a = map(&[("content", FieldValue::Bytes(b"one".to_vec()))]);
        let b = map(&[("content", FieldValue::Bytes(b"two".to_vec()))]);
        let diff = FieldDiff::compute(&a, "a", &b, "b", &[]);
        assert_eq!(
            diff.changed.get("content"),
            Some(&(FieldValue::Text("one".into()), FieldValue::Text("two".into())))
        );
    }

    #[test]
    fn test_multiline_text_gets_patch() {
        let a = map(&[("content", FieldValue::Bytes(b"a\nb\nc\n".to_vec()))]);
        let b = map(&[("content", FieldValue::Bytes(b"a\nB\nc\n".to_vec()))]);
        let diff = FieldDiff::compute(&a, "file:///x", &b, "file:///x", &[]);

        assert!(diff.changed.is_empty());
        let patch = &diff.patches["content"];
        assert!(patch.contains("-b\n+B\n"));
        assert!(!patch.contains("-a"));
    }

    #[test]
    fn test_trailing_newline_only_change_is_reported() {
        let a = map(&[("out", "a\nb".into())]);
        let b = map(&[("out", "a\nb\n".into())]);
        let diff = FieldDiff::compute(&a, "a", &b, "b", &[]);
        assert!(!diff.is_empty());
        assert!(diff.patches.contains_key("out"));
    }

    #[test]
    fn test_render_format() {
        let a = map(&[("gone", "x\ny".into()), ("size", 10i64.into()), ("text", "1\n2\n".into())]);
        let b = map(&[("added", 5i64.into()), ("size", 20i64.into()), ("text", "1\n3\n".into())]);
        let rendered = FieldDiff::compute(&a, "L1", &b, "L2", &[]).to_string();

        assert_eq!(
            rendered,
            "--- L1\n    gone: x\n    y\n+++ L2\n    added: 5\n!!! size: (-) 10 != (+) 20\n\
             !!! text:\n    @@ -1,2 +1,2 @@\n     1\n    -2\n    +3\n"
        );
    }
}
