//! Collection, diff and retention passes
//!
//! [`Monitor`] ties the snapshot store, an ordered list of collectors and a
//! report renderer together. Each public method is one pass:
//!
//! - [`Monitor::collect`] records a new closed session
//! - [`Monitor::diff`] compares the two newest closed sessions and stores a report
//! - [`Monitor::cleanup`] applies the retention limits
//! - [`Monitor::run`] does all three in order
//!
//! ## Examples
//!
//! ```rust,no_run
//! use sysdelta::{MonitorBuilder, DiffOutcome};
//! use sysdelta::collectors::SysinfoCollector;
//!
//! # fn main() -> sysdelta::Result<()> {
//! let mut monitor = MonitorBuilder::new()
//!     .collector(SysinfoCollector::new())
//!     .session_keep(10)
//!     .report_keep(10)
//!     .build("/var/lib/sysdelta/snapshots.db")?;
//!
//! monitor.collect()?;
//! match monitor.diff()? {
//!     DiffOutcome::Created { report, .. } => println!("{}", report.text),
//!     DiffOutcome::NoPreviousState => println!("no previous state"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! The open session row is committed before collection starts. Every item
//! write of the pass and the final close happen in one transaction, so an
//! interrupted pass leaves at most an open session behind, which the next
//! [`Monitor::cleanup`] deletes. The report of a diff pass is likewise saved
//! in one transaction.

use crate::collector::{CollectContext, Collector};
use crate::error::{MonitorError, Result};
use crate::render::{PlainRenderer, ReportRenderer};
use crate::session_diff::SessionDiff;
use crate::store::{SnapshotAccess, SnapshotStore};
use crate::types::{url_scheme, FieldMap, Item, Report, Session, COLLECT_ERROR};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Result of a diff pass
#[derive(Debug, Clone)]
pub enum DiffOutcome {
    /// Fewer than two closed sessions exist
    NoPreviousState,
    /// A report was created and stored
    Created {
        /// The stored report
        report: Report,
        /// The diff the report was rendered from
        diff: Box<SessionDiff>,
    },
}

impl DiffOutcome {
    /// The created report, if any
    pub fn report(&self) -> Option<&Report> {
        match self {
            DiffOutcome::Created { report, .. } => Some(report),
            DiffOutcome::NoPreviousState => None,
        }
    }
}

/// Statistics of a collection pass
#[derive(Debug, Clone)]
pub struct CollectSummary {
    /// The closed session
    pub session: Session,
    /// Items stored
    pub items: usize,
    /// Items carrying a `collect_error` field
    pub errors: usize,
    /// Items carried forward by the assume-unchanged shortcut
    pub assumed_unchanged: usize,
    /// Wall time of the pass
    pub duration: Duration,
}

/// Statistics of a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Sessions deleted
    pub sessions_deleted: usize,
    /// Reports deleted
    pub reports_deleted: usize,
}

/// Statistics of a full run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Collection pass
    pub collect: CollectSummary,
    /// Diff pass
    pub diff: DiffOutcome,
    /// Retention pass
    pub cleanup: CleanupStats,
}

/// Host change monitor
pub struct Monitor {
    store: SnapshotStore,
    collectors: Vec<Box<dyn Collector>>,
    renderer: Box<dyn ReportRenderer>,
    hostname: Option<String>,
    parallel_workers: usize,
    session_keep: usize,
    report_keep: usize,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("store", &self.store)
            .field("collectors", &self.collector_labels())
            .field("hostname", &self.hostname)
            .field("parallel_workers", &self.parallel_workers)
            .field("session_keep", &self.session_keep)
            .field("report_keep", &self.report_keep)
            .finish()
    }
}

impl Monitor {
    /// The underlying snapshot store
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Labels of the registered collectors, in registration order
    pub fn collector_labels(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.label()).collect()
    }

    /// Run a collection pass and return the closed session's summary
    ///
    /// # Errors
    ///
    /// Storage errors abort the pass. Failures of individual resources are
    /// recorded on their items and do not.
    #[instrument(skip(self))]
    pub fn collect(&mut self) -> Result<CollectSummary> {
        let start = Instant::now();

        let mut session = Session::open();
        session.hostname = self.hostname.clone();
        self.store.save_session(&session)?;
        info!(session = %session.id, "started collection");

        let previous = self.store.last_closed_session()?;
        let previous_items = match &previous {
            Some(p) => self.store.items_for_session(&p.id)?,
            None => Vec::new(),
        };
        let ctx = CollectContext::new(session.clone(), previous, previous_items);

        let urls = self.enumerate(&ctx);
        debug!("collecting {} resources", urls.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .build()
            .map_err(|e| MonitorError::internal(format!("failed to build thread pool: {}", e)))?;
        let collectors = &self.collectors;
        let mut items: Vec<Item> = pool.install(|| {
            urls.par_iter()
                .filter_map(|url| collect_url(collectors, url, &ctx))
                .collect()
        });

        for item in items.iter_mut() {
            for collector in collectors {
                if let Err(e) = collector.process_state(item) {
                    warn!(collector = %collector.label(), url = %item.url, error = %e, "process_state failed");
                    item.set(format!("{}_error", collector.label()), e.to_string());
                }
            }
        }

        let errors = items.iter().filter(|i| i.get(COLLECT_ERROR).is_some()).count();
        let assumed_unchanged = items.iter().filter(|i| i.is_assumed_unchanged()).count();

        session.close(items.len() as u64);
        self.store.transaction(|tx| {
            for item in &items {
                tx.save_item(item)?;
            }
            tx.save_session(&session)
        })?;

        let duration = start.elapsed();
        info!(
            session = %session.id,
            items = items.len(),
            errors,
            assumed_unchanged,
            "closed session in {:?}",
            duration
        );

        Ok(CollectSummary {
            session,
            items: items.len(),
            errors,
            assumed_unchanged,
            duration,
        })
    }

    /// Enumerate and filter resource URLs, in collector registration order
    fn enumerate(&self, ctx: &CollectContext) -> Vec<String> {
        let mut urls = Vec::new();
        for collector in &self.collectors {
            match collector.list_urls(ctx) {
                Ok(found) => {
                    trace!(collector = %collector.label(), count = found.len(), "listed urls");
                    urls.extend(found);
                }
                Err(e) => warn!(collector = %collector.label(), error = %e, "list_urls failed"),
            }
        }

        for collector in &self.collectors {
            urls = collector.process_urls(urls, ctx);
        }

        let mut seen = HashSet::new();
        urls.retain(|url| {
            if url_scheme(url).is_none() {
                warn!(url = %url, "skipping malformed resource url");
                return false;
            }
            seen.insert(url.clone())
        });
        urls
    }

    /// Compare the two most recent closed sessions and store a report
    #[instrument(skip(self))]
    pub fn diff(&mut self) -> Result<DiffOutcome> {
        let recent = self.store.recent_closed_sessions(2)?;
        let [new, old] = recent.as_slice() else {
            info!("no previous state - skipping diff");
            return Ok(DiffOutcome::NoPreviousState);
        };
        self.diff_pair(old, new)
    }

    /// Compare two stored sessions named by uuid or uuid prefix and store a
    /// report
    ///
    /// # Errors
    ///
    /// [`MonitorError::SessionNotFound`] when either id matches nothing, and
    /// [`MonitorError::InvalidArgument`] when a session is still open.
    #[instrument(skip(self))]
    pub fn diff_sessions(&mut self, old_id: &str, new_id: &str) -> Result<DiffOutcome> {
        let old = self.store.find_session(old_id)?;
        let new = self.store.find_session(new_id)?;
        for session in [&old, &new] {
            if !session.closed {
                return Err(MonitorError::invalid_argument(format!(
                    "session {} is still open",
                    session.id
                )));
            }
        }
        self.diff_pair(&old, &new)
    }

    fn diff_pair(&mut self, old: &Session, new: &Session) -> Result<DiffOutcome> {
        let mut diff = SessionDiff::compute(&self.store, old, new)?;
        for collector in &self.collectors {
            if let Err(e) = collector.process_diff(&mut diff) {
                warn!(collector = %collector.label(), error = %e, "process_diff failed");
            }
        }

        let text = self.renderer.render_text(&diff);
        let html = self.renderer.render_html(&diff, &text);
        let report = Report::new(text, html, diff.is_empty(), new.hostname.clone());

        self.store.transaction(|tx| tx.save_report(&report))?;
        info!(report = %report.id, is_empty = report.is_empty, "stored report");

        Ok(DiffOutcome::Created {
            report,
            diff: Box::new(diff),
        })
    }

    /// Delete everything but the newest `session_keep` closed sessions and
    /// `report_keep` reports
    #[instrument(skip(self))]
    pub fn cleanup(&mut self) -> Result<CleanupStats> {
        let stats = CleanupStats {
            sessions_deleted: self.store.prune_sessions(self.session_keep)?,
            reports_deleted: self.store.prune_reports(self.report_keep)?,
        };
        info!(
            sessions_deleted = stats.sessions_deleted,
            reports_deleted = stats.reports_deleted,
            "retention pass finished"
        );
        Ok(stats)
    }

    /// Collect, diff and clean up
    pub fn run(&mut self) -> Result<RunSummary> {
        let collect = self.collect()?;
        let diff = self.diff()?;
        let cleanup = self.cleanup()?;
        Ok(RunSummary { collect, diff, cleanup })
    }

    /// The most recent report
    pub fn last_report(&self) -> Result<Option<Report>> {
        self.store.last_report()
    }
}

/// Ask every collector for the state of `url`
///
/// The first collector that supports the URL owns the item; fields from
/// later supporting collectors are merged in. Returns `None` when no
/// collector supports the URL.
fn collect_url(collectors: &[Box<dyn Collector>], url: &str, ctx: &CollectContext) -> Option<Item> {
    let mut owner: Option<&str> = None;
    let mut fields = FieldMap::new();

    for collector in collectors {
        match collector.get_state(url, ctx) {
            Ok(state) => {
                owner.get_or_insert(collector.label());
                fields.extend(state);
            }
            Err(e) if e.is_unsupported() => {}
            Err(e) => {
                warn!(collector = %collector.label(), url = %url, error = %e, "failed to collect state");
                owner.get_or_insert(collector.label());
                fields.insert(COLLECT_ERROR.to_string(), e.to_string().into());
            }
        }
    }

    match owner {
        Some(plugin) => Some(Item {
            session_id: ctx.session.id.clone(),
            url: url.to_string(),
            plugin: plugin.to_string(),
            fields,
        }),
        None => {
            trace!(url = %url, "no collector supports url");
            None
        }
    }
}

/// Builder for [`Monitor`]
pub struct MonitorBuilder {
    collectors: Vec<Box<dyn Collector>>,
    renderer: Box<dyn ReportRenderer>,
    hostname: Option<String>,
    parallel_workers: usize,
    session_keep: usize,
    report_keep: usize,
}

impl std::fmt::Debug for MonitorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorBuilder")
            .field("collectors", &self.collectors.iter().map(|c| c.label()).collect::<Vec<_>>())
            .field("hostname", &self.hostname)
            .field("parallel_workers", &self.parallel_workers)
            .field("session_keep", &self.session_keep)
            .field("report_keep", &self.report_keep)
            .finish()
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorBuilder {
    /// Create a builder with no collectors and default settings
    ///
    /// The host name defaults to the machine's name, retention to 10
    /// sessions and 10 reports.
    pub fn new() -> Self {
        Self {
            collectors: Vec::new(),
            renderer: Box::new(PlainRenderer),
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
            parallel_workers: num_cpus::get(),
            session_keep: 10,
            report_keep: 10,
        }
    }

    /// Register a collector; registration order is invocation order
    pub fn collector(mut self, collector: impl Collector + 'static) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    /// Register already boxed collectors
    pub fn collectors(mut self, collectors: Vec<Box<dyn Collector>>) -> Self {
        self.collectors.extend(collectors);
        self
    }

    /// Set the report renderer
    pub fn renderer(mut self, renderer: impl ReportRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Override the host name recorded on sessions and reports
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Number of threads used for `get_state` (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = count.max(1);
        self
    }

    /// Closed sessions kept by [`Monitor::cleanup`]
    ///
    /// Values below 2 are raised to 2 so a diff always has a predecessor.
    pub fn session_keep(mut self, keep: usize) -> Self {
        self.session_keep = keep.max(2);
        self
    }

    /// Reports kept by [`Monitor::cleanup`]
    pub fn report_keep(mut self, keep: usize) -> Self {
        self.report_keep = keep;
        self
    }

    /// Build a monitor backed by the database at `db_path`
    pub fn build(self, db_path: impl AsRef<Path>) -> Result<Monitor> {
        let store = SnapshotStore::open(db_path)?;
        self.build_with_store(store)
    }

    /// Build a monitor backed by an in-memory store
    pub fn build_in_memory(self) -> Result<Monitor> {
        self.build_with_store(SnapshotStore::open_in_memory()?)
    }

    /// Build a monitor around an existing store
    pub fn build_with_store(self, store: SnapshotStore) -> Result<Monitor> {
        let mut labels = HashSet::new();
        for collector in &self.collectors {
            if !labels.insert(collector.label()) {
                return Err(MonitorError::config(format!(
                    "collector label '{}' registered twice",
                    collector.label()
                )));
            }
        }

        Ok(Monitor {
            store,
            collectors: self.collectors,
            renderer: self.renderer,
            hostname: self.hostname,
            parallel_workers: self.parallel_workers,
            session_keep: self.session_keep,
            report_keep: self.report_keep,
        })
    }
}
