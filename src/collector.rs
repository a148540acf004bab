//! Collector protocol
//!
//! A collector owns one class of monitored resource (files, command output,
//! host metadata, login records) and takes part in every phase of a pass:
//!
//! 1. [`Collector::list_urls`] enumerates the resources it manages
//! 2. [`Collector::process_urls`] may filter or extend the global URL list
//! 3. [`Collector::get_state`] records the current fields of one resource,
//!    or returns [`CollectorError::Unsupported`] for URLs it does not own
//! 4. [`Collector::process_state`] may amend any item of the session after
//!    raw collection
//! 5. [`Collector::process_diff`] may annotate the computed session diff
//!
//! Every method has a default, so a collector implements only the phases it
//! cares about. The monitor calls collectors in registration order for the
//! list-wide phases (2, 4, 5); `get_state` may run in parallel across URLs.
//!
//! # Error Handling
//!
//! - `Unsupported` is the normal "not mine" answer and is skipped silently.
//! - Any other error from `get_state` is a resource-level failure: the
//!   monitor records it as a `collect_error` field and moves on.
//! - An error from `process_state` is recorded on the item as a
//!   `<label>_error` field, so it shows up in the next diff.
//! - Errors from `list_urls` and `process_diff` are logged and the pass
//!   continues without that collector's contribution.

use crate::error::CollectorError;
use crate::session_diff::SessionDiff;
use crate::types::{FieldMap, Item, Session};
use std::collections::BTreeMap;

/// Read-only information shared with collectors during a collection pass
#[derive(Debug, Clone)]
pub struct CollectContext {
    /// The session being collected (still open)
    pub session: Session,
    /// The most recent closed session, if any
    pub previous: Option<Session>,
    /// Items of the previous session keyed by URL
    pub previous_items: BTreeMap<String, Item>,
}

impl CollectContext {
    /// Context for a session with prior state
    pub fn new(session: Session, previous: Option<Session>, previous_items: Vec<Item>) -> Self {
        Self {
            session,
            previous,
            previous_items: previous_items.into_iter().map(|i| (i.url.clone(), i)).collect(),
        }
    }

    /// Context without any prior state
    pub fn first_run(session: Session) -> Self {
        Self::new(session, None, Vec::new())
    }

    /// The previous session's item for `url`
    pub fn previous_item(&self, url: &str) -> Option<&Item> {
        self.previous_items.get(url)
    }
}

/// State collector
pub trait Collector: Send + Sync {
    /// Unique label, stored as the `plugin` of items this collector owns
    fn label(&self) -> &str;

    /// Enumerate the resource URLs this collector manages
    fn list_urls(&self, _ctx: &CollectContext) -> Result<Vec<String>, CollectorError> {
        Ok(Vec::new())
    }

    /// Filter or extend the combined URL list
    fn process_urls(&self, urls: Vec<String>, _ctx: &CollectContext) -> Vec<String> {
        urls
    }

    /// Current fields of `url`
    ///
    /// Returns [`CollectorError::Unsupported`] for URLs owned by another
    /// collector.
    fn get_state(&self, url: &str, _ctx: &CollectContext) -> Result<FieldMap, CollectorError> {
        Err(CollectorError::Unsupported(url.to_string()))
    }

    /// Post-process an item of the current session
    fn process_state(&self, _item: &mut Item) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Annotate a computed session diff
    fn process_diff(&self, _diff: &mut SessionDiff) -> Result<(), CollectorError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector").field("label", &self.label()).finish()
    }
}
