//! Property-based testing for sysdelta
//!
//! Uses proptest to check the comparison and hashing invariants across
//! randomly generated field maps, texts and byte buffers.

use ::sysdelta::diff::{unified_patch, DiffOptions};
use ::sysdelta::hasher::{digest, sample_digest};
use ::sysdelta::*;
use proptest::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::{Cursor, Seek, SeekFrom};

/// Field values that compare by identity (no floats, no bytes)
fn value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        "[a-z0-9 ]{0,12}".prop_map(FieldValue::Text),
        "[a-z]{1,6}\n[a-z]{1,6}\n".prop_map(FieldValue::Text),
        (-5i64..5).prop_map(FieldValue::Integer),
        any::<bool>().prop_map(FieldValue::Boolean),
    ]
}

/// Small key space so that both maps share keys often
fn field_map_strategy() -> impl Strategy<Value = FieldMap> {
    prop::collection::btree_map("(size|mtime|hash|mode|stdout|uuid|id)", value_strategy(), 0..7)
}

fn without(map: &FieldMap, ignored: &[&str]) -> FieldMap {
    map.iter()
        .filter(|(k, _)| !ignored.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn lines_to_text(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

fn item(url: &str) -> Item {
    Item::new("s", url, "test").with_field("size", FieldValue::Integer(1))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A field diff is empty exactly when the maps agree outside the ignored keys
    #[test]
    fn field_diff_empty_iff_equal(a in field_map_strategy(), b in field_map_strategy()) {
        let ignored = ["id", "uuid"];
        let diff = FieldDiff::compute(&a, "a", &b, "b", &ignored);
        prop_assert_eq!(diff.is_empty(), without(&a, &ignored) == without(&b, &ignored));

        let self_diff = FieldDiff::compute(&a, "a", &a, "a", &[]);
        prop_assert!(self_diff.is_empty());
        prop_assert_eq!(self_diff.equal.len(), a.len());
    }

    /// Every non-ignored key lands in exactly one bucket
    #[test]
    fn field_diff_partitions_keys(a in field_map_strategy(), b in field_map_strategy()) {
        let ignored = ["uuid"];
        let diff = FieldDiff::compute(&a, "a", &b, "b", &ignored);

        let buckets: Vec<BTreeSet<&str>> = vec![
            diff.only_a.keys().map(String::as_str).collect(),
            diff.only_b.keys().map(String::as_str).collect(),
            diff.equal.iter().map(String::as_str).collect(),
            diff.changed.keys().map(String::as_str).collect(),
            diff.patches.keys().map(String::as_str).collect(),
        ];
        let total: usize = buckets.iter().map(BTreeSet::len).sum();
        let union: BTreeSet<&str> = buckets.iter().flatten().copied().collect();
        let expected: BTreeSet<&str> = a
            .keys()
            .chain(b.keys())
            .map(String::as_str)
            .filter(|k| !ignored.contains(k))
            .collect();

        prop_assert_eq!(total, union.len());
        prop_assert_eq!(union, expected);
        prop_assert_eq!(diff.change_count(), diff.changed_keys().len());
    }

    /// Diffing a text against itself yields no patch
    #[test]
    fn unified_patch_of_identical_text_is_empty(lines in prop::collection::vec("[a-z ]{0,10}", 0..30)) {
        let text = lines_to_text(&lines);
        prop_assert_eq!(unified_patch(&text, &text, &DiffOptions::default()), "");
    }

    /// Changing one line yields exactly one deletion and one addition
    #[test]
    fn single_line_change_is_one_pair(
        lines in prop::collection::vec("[a-z ]{0,10}", 1..30),
        index in any::<prop::sample::Index>(),
    ) {
        let old = lines_to_text(&lines);
        let mut changed = lines.clone();
        let i = index.index(changed.len());
        changed[i].push('X');
        let new = lines_to_text(&changed);

        let patch = unified_patch(&old, &new, &DiffOptions::default());
        let removed: Vec<&str> = patch.lines().filter(|l| l.starts_with('-')).collect();
        let added: Vec<&str> = patch.lines().filter(|l| l.starts_with('+')).collect();
        let expected_removed = format!("-{}", lines[i]);
        let expected_added = format!("+{}", changed[i]);
        prop_assert_eq!(removed, vec![expected_removed.as_str()]);
        prop_assert_eq!(added, vec![expected_added.as_str()]);
        prop_assert!(patch.starts_with("@@ -"));
    }

    /// A windowed digest equals SHA-256 over the same slice
    #[test]
    fn window_digest_matches_sha256(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        start in any::<prop::sample::Index>(),
        len in any::<prop::sample::Index>(),
    ) {
        let offset = start.index(data.len() + 1);
        let length = len.index(data.len() - offset + 1);
        let mut src = Cursor::new(data.clone());

        let got = digest(&mut src, offset as u64, Some(length as u64)).unwrap();
        let want: [u8; 32] = Sha256::digest(&data[offset..offset + length]).into();
        prop_assert_eq!(got, want);

        let past_end = digest(&mut src, data.len() as u64 + 1, None);
        prop_assert!(past_end.is_err());
    }

    /// Sampling is deterministic and leaves the read position untouched
    #[test]
    fn sample_digest_is_deterministic(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        sample_size in 1u64..256,
        sample_count in 1usize..8,
        seed in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let mut src = Cursor::new(data);
        src.seek(SeekFrom::Start(0)).unwrap();
        let first = sample_digest(&mut src, sample_size, sample_count, &seed).unwrap();
        prop_assert_eq!(src.position(), 0);
        let second = sample_digest(&mut src, sample_size, sample_count, &seed).unwrap();
        prop_assert_eq!(first, second);
    }

    /// found/common/lost split the two URL sets
    #[test]
    fn session_diff_splits_url_sets(
        old_urls in prop::collection::btree_set("file:///[a-e]", 0..6),
        new_urls in prop::collection::btree_set("file:///[a-e]", 0..6),
    ) {
        let old_items = old_urls.iter().map(|u| item(u)).collect();
        let new_items = new_urls.iter().map(|u| item(u)).collect();
        let diff = SessionDiff::from_items(Session::open(), old_items, Session::open(), new_items);

        let found_or_common: BTreeSet<String> = diff.found.union(&diff.common).cloned().collect();
        let lost_or_common: BTreeSet<String> = diff.lost.union(&diff.common).cloned().collect();
        prop_assert_eq!(found_or_common, new_urls);
        prop_assert_eq!(lost_or_common, old_urls);
        prop_assert!(diff.found.is_disjoint(&diff.lost));
        // Identical field maps on both sides
        prop_assert!(diff.diffs.is_empty());
    }
}
