//! # sysdelta - Host change monitoring
//!
//! Periodically snapshots the state of a host (files, command output, host
//! metadata) into SQLite and reports what changed between two snapshots.
//!
//! ## Overview
//!
//! sysdelta records every collection cycle as a *session*. A session holds
//! one *item* per monitored resource, each a flat map of named fields
//! (`size`, `mtime`, `hash`, `stdout`, ...). Comparing the two most recent
//! sessions yields:
//! - resources that appeared (*found*) or disappeared (*lost*)
//! - per-resource field changes, with line patches for multi-line values
//! - collector annotations such as the logins active during the change
//!
//! The rendered comparison is stored as a *report*.
//!
//! ## Architecture
//!
//! - **Collectors** ([`collector::Collector`]): pluggable sources of resource
//!   state, each identified by a URL scheme (`file://`, `command://`, ...)
//! - **Snapshot store** ([`store::SnapshotStore`]): sessions, items and
//!   reports in a single SQLite file with upsert semantics
//! - **Diff engine** ([`field_diff`], [`session_diff`], [`diff`]): key-level
//!   comparison of field maps and Myers line diffs of text values
//! - **Content hasher** ([`hasher`]): windowed and sampled SHA-256 digests
//! - **Monitor** ([`Monitor`]): runs the collect, diff and cleanup passes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sysdelta::{DiffOutcome, MonitorConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::from_file_or_default("/etc/sysdelta/sysdelta.toml")?;
//! let mut monitor = config.builder()?.build(&config.storage.db_path)?;
//!
//! monitor.collect()?;
//! if let DiffOutcome::Created { report, .. } = monitor.diff()? {
//!     print!("{}", report.text);
//! }
//! monitor.cleanup()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Custom Collectors
//!
//! ```rust,no_run
//! use sysdelta::{CollectContext, Collector, CollectorError, FieldMap, MonitorBuilder};
//!
//! struct Uptime;
//!
//! impl Collector for Uptime {
//!     fn label(&self) -> &str {
//!         "uptime"
//!     }
//!
//!     fn list_urls(&self, _ctx: &CollectContext) -> Result<Vec<String>, CollectorError> {
//!         Ok(vec!["uptime://".to_string()])
//!     }
//!
//!     fn get_state(&self, url: &str, _ctx: &CollectContext) -> Result<FieldMap, CollectorError> {
//!         if url != "uptime://" {
//!             return Err(CollectorError::Unsupported(url.to_string()));
//!         }
//!         let raw = std::fs::read_to_string("/proc/uptime")?;
//!         Ok(FieldMap::from([("raw".to_string(), raw.into())]))
//!     }
//! }
//!
//! # fn main() -> sysdelta::Result<()> {
//! let mut monitor = MonitorBuilder::new().collector(Uptime).build_in_memory()?;
//! monitor.collect()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Sessions
//!
//! A session is open while its collection pass runs and closed once every
//! item is stored. Only closed sessions take part in diffs; open ones left
//! by an interrupted pass are removed by the retention pass.
//!
//! ### Assume-unchanged shortcut
//!
//! The file collector can skip hashing a file when configured cheap
//! metadata (size, mtime) matches the previous session. Such items carry
//! `assume_nochange = true` and the previous session's fields.
//!
//! ## Error Handling
//!
//! Library operations return [`Result<T>`] with [`MonitorError`]. A failure
//! to collect one resource does not abort a pass: it is stored as a
//! `collect_error` field on that resource's item.
//!
//! ## Module Organization
//!
//! - [`monitor`]: passes and [`MonitorBuilder`]
//! - [`collector`] / [`collectors`]: collector protocol and built-ins
//! - [`store`]: SQLite persistence
//! - [`field_diff`], [`session_diff`], [`diff`]: comparison
//! - [`render`]: report rendering
//! - [`config`]: TOML configuration
//! - [`types`]: sessions, items, reports and field values
//! - [`error`]: error types

// Public API modules
pub mod collector;
pub mod collectors;
pub mod config;
pub mod diff;
pub mod error;
pub mod field_diff;
pub mod hasher;
pub mod monitor;
pub mod render;
pub mod session_diff;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use collector::{CollectContext, Collector};
pub use config::MonitorConfig;
pub use error::{CollectorError, MonitorError, Result};
pub use field_diff::FieldDiff;
pub use monitor::{CleanupStats, CollectSummary, DiffOutcome, Monitor, MonitorBuilder, RunSummary};
pub use render::{PlainRenderer, ReportRenderer};
pub use session_diff::SessionDiff;
pub use store::{SnapshotAccess, SnapshotStore};
pub use types::*;
