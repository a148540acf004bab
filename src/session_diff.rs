//! Resource-set and field-level comparison of two sessions
//!
//! A [`SessionDiff`] lists the URLs that appeared (`found`), disappeared
//! (`lost`) or exist in both sessions (`common`), plus one [`FieldDiff`] per
//! common URL whose fields changed. Bookkeeping fields
//! ([`BOOKKEEPING_FIELDS`]) never count as changes, so an item carried
//! forward by the assume-unchanged shortcut compares equal to its
//! predecessor.
//!
//! Collectors can attach free-form annotations through [`SessionDiff::extra`]
//! during the `process_diff` phase.

use crate::error::Result;
use crate::field_diff::FieldDiff;
use crate::store::SnapshotAccess;
use crate::types::{Item, Session, BOOKKEEPING_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Difference between an older and a newer session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDiff {
    /// Older session
    pub old: Session,
    /// Newer session
    pub new: Session,
    /// URLs only in the newer session
    pub found: BTreeSet<String>,
    /// URLs only in the older session
    pub lost: BTreeSet<String>,
    /// URLs present in both
    pub common: BTreeSet<String>,
    /// Non-empty per-resource diffs, ordered by URL
    pub diffs: Vec<FieldDiff>,
    /// Annotations added by collectors
    pub extra: BTreeMap<String, String>,
}

impl SessionDiff {
    /// Load both sessions' items from `store` and compare them
    pub fn compute<S: SnapshotAccess + ?Sized>(store: &S, old: &Session, new: &Session) -> Result<Self> {
        let old_items = store.items_for_session(&old.id)?;
        let new_items = store.items_for_session(&new.id)?;
        let diff = Self::from_items(old.clone(), old_items, new.clone(), new_items);
        debug!(
            old = %old.id,
            new = %new.id,
            found = diff.found.len(),
            lost = diff.lost.len(),
            changed = diff.diffs.len(),
            "computed session diff"
        );
        Ok(diff)
    }

    /// Compare two already loaded item sets
    pub fn from_items(old: Session, old_items: Vec<Item>, new: Session, new_items: Vec<Item>) -> Self {
        let old_by_url: BTreeMap<String, Item> = old_items.into_iter().map(|i| (i.url.clone(), i)).collect();
        let new_by_url: BTreeMap<String, Item> = new_items.into_iter().map(|i| (i.url.clone(), i)).collect();

        let old_urls: BTreeSet<String> = old_by_url.keys().cloned().collect();
        let new_urls: BTreeSet<String> = new_by_url.keys().cloned().collect();

        let found = new_urls.difference(&old_urls).cloned().collect();
        let lost = old_urls.difference(&new_urls).cloned().collect();
        let common: BTreeSet<String> = old_urls.intersection(&new_urls).cloned().collect();

        let diffs = common
            .iter()
            .filter_map(|url| {
                let (a, b) = (old_by_url.get(url)?, new_by_url.get(url)?);
                let diff = FieldDiff::compute(&a.fields, url, &b.fields, url, &BOOKKEEPING_FIELDS);
                (!diff.is_empty()).then_some(diff)
            })
            .collect();

        Self {
            old,
            new,
            found,
            lost,
            common,
            diffs,
            extra: BTreeMap::new(),
        }
    }

    /// True iff no URL appeared or disappeared and no common resource changed
    pub fn is_empty(&self) -> bool {
        self.found.is_empty() && self.lost.is_empty() && self.diffs.is_empty()
    }

    /// The diff recorded for `url`, if it changed
    pub fn diff_for(&self, url: &str) -> Option<&FieldDiff> {
        self.diffs.iter().find(|d| d.label_b == url)
    }

    /// URLs of common resources whose fields changed
    pub fn changed_urls(&self) -> impl Iterator<Item = &str> {
        self.diffs.iter().map(|d| d.label_b.as_str())
    }
}

impl fmt::Display for SessionDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- old session @ {}", self.old.stamp.format("%Y-%m-%d %H:%M:%S %Z"))?;
        for url in &self.lost {
            writeln!(f, "  {}", url)?;
        }
        writeln!(f, "+ new session @ {}", self.new.stamp.format("%Y-%m-%d %H:%M:%S %Z"))?;
        for url in &self.found {
            writeln!(f, "  {}", url)?;
        }

        if self.is_empty() {
            writeln!(f, "= no difference")?;
        } else {
            for diff in &self.diffs {
                write!(f, "{}", diff)?;
            }
        }
        Ok(())
    }
}
