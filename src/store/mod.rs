//! SQLite-backed snapshot store
//!
//! Persists [`Session`]s, [`Item`]s and [`Report`]s in a single local database
//! file.
//!
//! ## Overview
//!
//! - **Upsert by natural key**: sessions and reports by uuid, items by
//!   `(url, sessionid)`. Re-running a pass never duplicates rows.
//! - **Typed free-form fields**: item fields live in `item_fields`, one row
//!   per field with a `kind` tag, so any [`FieldValue`] round-trips exactly.
//! - **Atomic deletes**: a session is removed together with its items and
//!   their fields in one transaction.
//! - **Retention**: [`SnapshotAccess::prune_sessions`] and
//!   [`SnapshotAccess::prune_reports`] keep the newest N and delete the rest.
//!   Open sessions are never kept.
//!
//! All operations are provided by the [`SnapshotAccess`] trait, implemented
//! by both the store and the [`StoreTx`] handle passed to
//! [`SnapshotStore::transaction`], so a pass can batch its writes into one
//! transaction with the same API.
//!
//! ## Examples
//!
//! ```rust
//! use sysdelta::store::{SnapshotAccess, SnapshotStore};
//! use sysdelta::types::{Item, Session};
//!
//! # fn main() -> sysdelta::Result<()> {
//! let store = SnapshotStore::open_in_memory()?;
//! let session = Session::open();
//! store.transaction(|tx| {
//!     tx.save_session(&session)?;
//!     tx.save_item(&Item::new(&session.id, "file:///etc/hosts", "file").with_field("size", 158i64))
//! })?;
//! assert_eq!(store.items_for_session(&session.id)?.len(), 1);
//! # Ok(())
//! # }
//! ```

mod migrations;

use crate::error::{MonitorError, Result};
use crate::types::{format_timestamp, parse_timestamp, url_scheme, FieldValue, Item, Report, Session};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const SESSION_COLUMNS: &str = "uuid, stamp, closed, start_time, end_time, hostname, item_count";
const REPORT_COLUMNS: &str = "uuid, stamp, text, html, is_empty, hostname";

/// Row counts of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// All sessions, open or closed
    pub sessions: u64,
    /// Closed sessions
    pub closed_sessions: u64,
    /// Items across all sessions
    pub items: u64,
    /// Reports
    pub reports: u64,
}

/// Snapshot store backed by a SQLite database
pub struct SnapshotStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SnapshotStore {
    /// Open (or create) the store at `path` and apply pending migrations
    ///
    /// Parent directories are created as needed. The database runs in WAL
    /// mode so readers can print reports while a collection pass writes.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_migrations(&mut conn)?;

        debug!("opened snapshot store at {:?}", path);
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside a write transaction
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let tx = StoreTx {
            tx: Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?,
        };
        let value = f(&tx)?;
        tx.tx.commit()?;
        Ok(value)
    }

    /// Resolve a session from its uuid or a uuid prefix
    ///
    /// # Errors
    ///
    /// - [`MonitorError::SessionNotFound`] if no session matches
    /// - [`MonitorError::InvalidArgument`] if the prefix is empty or matches
    ///   more than one session
    pub fn find_session(&self, prefix: &str) -> Result<Session> {
        if prefix.is_empty() {
            return Err(MonitorError::invalid_argument("empty session id"));
        }
        if let Some(session) = self.session(prefix)? {
            return Ok(session);
        }
        let mut matches = self.sessions()?.into_iter().filter(|s| s.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(session), None) => Ok(session),
            (None, _) => Err(MonitorError::SessionNotFound(prefix.to_string())),
            (Some(_), Some(_)) => Err(MonitorError::invalid_argument(format!(
                "session prefix '{}' is ambiguous",
                prefix
            ))),
        }
    }

    /// Resolve a report from its uuid or a uuid prefix
    ///
    /// Same rules as [`find_session`](Self::find_session), failing with
    /// [`MonitorError::ReportNotFound`].
    pub fn find_report(&self, prefix: &str) -> Result<Report> {
        if prefix.is_empty() {
            return Err(MonitorError::invalid_argument("empty report id"));
        }
        if let Some(report) = self.report(prefix)? {
            return Ok(report);
        }
        let mut matches = self.reports()?.into_iter().filter(|r| r.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(report), None) => Ok(report),
            (None, _) => Err(MonitorError::ReportNotFound(prefix.to_string())),
            (Some(_), Some(_)) => Err(MonitorError::invalid_argument(format!(
                "report prefix '{}' is ambiguous",
                prefix
            ))),
        }
    }
}

/// Transaction handle exposing the full [`SnapshotAccess`] API
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl SnapshotAccess for SnapshotStore {
    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn atomically<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl SnapshotAccess for StoreTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }

    fn atomically<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        // Already inside the caller's transaction
        f(&self.tx)
    }
}

/// Snapshot persistence operations
///
/// Implementors only provide the connection and a way to group statements
/// atomically; every query is a provided method.
pub trait SnapshotAccess {
    /// Underlying connection
    fn conn(&self) -> &Connection;

    /// Run `f` so that all of its statements apply or none do
    fn atomically<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T>;

    /// Insert or update a session by uuid
    fn save_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (uuid, stamp, closed, start_time, end_time, hostname, item_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(uuid) DO UPDATE SET
                 stamp = excluded.stamp,
                 closed = excluded.closed,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 hostname = excluded.hostname,
                 item_count = excluded.item_count",
            params![
                session.id,
                format_timestamp(&session.stamp),
                session.closed,
                format_timestamp(&session.start_time),
                session.end_time.as_ref().map(format_timestamp),
                session.hostname,
                to_i64(session.item_count)?,
            ],
        )?;
        trace!(session = %session.id, closed = session.closed, "saved session");
        Ok(())
    }

    /// Insert or replace an item by `(url, session_id)`
    ///
    /// The stored field set becomes exactly `item.fields`.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::InvalidUrl`] if the URL has no `scheme://` prefix
    /// - [`MonitorError::MissingSession`] if the session id is empty
    /// - a database error if the session does not exist
    fn save_item(&self, item: &Item) -> Result<()> {
        if url_scheme(&item.url).is_none() {
            return Err(MonitorError::InvalidUrl(item.url.clone()));
        }
        if item.session_id.is_empty() {
            return Err(MonitorError::MissingSession(item.url.clone()));
        }

        self.atomically(|conn| {
            conn.execute(
                "INSERT INTO items (url, sessionid, plugin) VALUES (?1, ?2, ?3)
                 ON CONFLICT(url, sessionid) DO UPDATE SET plugin = excluded.plugin",
                params![item.url, item.session_id, item.plugin],
            )?;
            conn.execute(
                "DELETE FROM item_fields WHERE sessionid = ?1 AND url = ?2",
                params![item.session_id, item.url],
            )?;

            let mut stmt = conn.prepare_cached(
                "INSERT INTO item_fields (sessionid, url, name, kind, value) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (name, value) in &item.fields {
                let (kind, raw) = value.encode();
                stmt.execute(params![item.session_id, item.url, name, kind, raw])?;
            }
            Ok(())
        })
    }

    /// Insert or update a report by uuid
    fn save_report(&self, report: &Report) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reports (uuid, stamp, text, html, is_empty, hostname)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uuid) DO UPDATE SET
                 stamp = excluded.stamp,
                 text = excluded.text,
                 html = excluded.html,
                 is_empty = excluded.is_empty,
                 hostname = excluded.hostname",
            params![
                report.id,
                format_timestamp(&report.stamp),
                report.text,
                report.html,
                report.is_empty,
                report.hostname,
            ],
        )?;
        Ok(())
    }

    /// Look up a session by uuid
    fn session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE uuid = ?1", SESSION_COLUMNS);
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;
        rows.next()?.map(row_to_session).transpose()
    }

    /// All sessions, newest first
    fn sessions(&self) -> Result<Vec<Session>> {
        query_sessions(self.conn(), "", i64::MAX)
    }

    /// The `count` most recent closed sessions, newest first
    fn recent_closed_sessions(&self, count: usize) -> Result<Vec<Session>> {
        query_sessions(self.conn(), "WHERE closed = 1", sql_limit(count))
    }

    /// The most recent closed session
    fn last_closed_session(&self) -> Result<Option<Session>> {
        Ok(self.recent_closed_sessions(1)?.into_iter().next())
    }

    /// Look up one item by `(session_id, url)`
    fn item(&self, session_id: &str, url: &str) -> Result<Option<Item>> {
        let plugin: Option<String> = self
            .conn()
            .query_row(
                "SELECT plugin FROM items WHERE sessionid = ?1 AND url = ?2",
                params![session_id, url],
                |row| row.get(0),
            )
            .optional()?;
        let Some(plugin) = plugin else {
            return Ok(None);
        };

        let mut item = Item::new(session_id, url, plugin);
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT name, kind, value FROM item_fields WHERE sessionid = ?1 AND url = ?2")?;
        let mut rows = stmt.query(params![session_id, url])?;
        while let Some(row) = rows.next()? {
            let (name, value) = row_to_field(row)?;
            item.fields.insert(name, value);
        }
        Ok(Some(item))
    }

    /// All items of a session, ordered by url
    fn items_for_session(&self, session_id: &str) -> Result<Vec<Item>> {
        let mut items: BTreeMap<String, Item> = BTreeMap::new();

        let mut stmt = self
            .conn()
            .prepare_cached("SELECT url, plugin FROM items WHERE sessionid = ?1")?;
        let mut rows = stmt.query(params![session_id])?;
        while let Some(row) = rows.next()? {
            let url: String = row.get(0)?;
            let plugin: String = row.get(1)?;
            items.insert(url.clone(), Item::new(session_id, url, plugin));
        }

        let mut stmt = self
            .conn()
            .prepare_cached("SELECT url, name, kind, value FROM item_fields WHERE sessionid = ?1")?;
        let mut rows = stmt.query(params![session_id])?;
        while let Some(row) = rows.next()? {
            let url: String = row.get(0)?;
            let name: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let value = FieldValue::decode(&kind, row.get(3)?)?;
            if let Some(item) = items.get_mut(&url) {
                item.fields.insert(name, value);
            }
        }

        Ok(items.into_values().collect())
    }

    /// Resource URLs recorded in a session, sorted
    fn urls_for_session(&self, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT url FROM items WHERE sessionid = ?1 ORDER BY url")?;
        let urls = stmt
            .query_map(params![session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
    }

    /// Number of items stored for a session
    fn item_count(&self, session_id: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM items WHERE sessionid = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Look up a report by uuid
    fn report(&self, id: &str) -> Result<Option<Report>> {
        let sql = format!("SELECT {} FROM reports WHERE uuid = ?1", REPORT_COLUMNS);
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;
        rows.next()?.map(row_to_report).transpose()
    }

    /// The `count` most recent reports, newest first
    fn recent_reports(&self, count: usize) -> Result<Vec<Report>> {
        let sql = format!(
            "SELECT {} FROM reports ORDER BY stamp DESC, rowid DESC LIMIT ?1",
            REPORT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query(params![sql_limit(count)])?;
        let mut reports = Vec::new();
        while let Some(row) = rows.next()? {
            reports.push(row_to_report(row)?);
        }
        Ok(reports)
    }

    /// The most recent report
    fn last_report(&self) -> Result<Option<Report>> {
        Ok(self.recent_reports(1)?.into_iter().next())
    }

    /// All reports, newest first
    fn reports(&self) -> Result<Vec<Report>> {
        self.recent_reports(usize::MAX)
    }

    /// Delete a session together with all of its items
    ///
    /// Returns whether the session existed.
    fn delete_session(&self, id: &str) -> Result<bool> {
        self.atomically(|conn| delete_session_rows(conn, id))
    }

    /// Delete a report; returns whether it existed
    fn delete_report(&self, id: &str) -> Result<bool> {
        let deleted = self.conn().execute("DELETE FROM reports WHERE uuid = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Keep the `keep` most recent closed sessions and delete every other one
    ///
    /// Open sessions are left-overs of interrupted passes and are always
    /// deleted. Returns the number of sessions removed.
    fn prune_sessions(&self, keep: usize) -> Result<usize> {
        let kept: Vec<String> = self
            .recent_closed_sessions(keep)?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let doomed: Vec<String> = {
            let mut stmt = self.conn().prepare("SELECT uuid FROM sessions")?;
            let all = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            all.into_iter().filter(|id| !kept.contains(id)).collect()
        };

        self.atomically(|conn| {
            for id in &doomed {
                delete_session_rows(conn, id)?;
            }
            Ok(())
        })?;

        if !doomed.is_empty() {
            debug!(deleted = doomed.len(), kept = kept.len(), "pruned sessions");
        }
        Ok(doomed.len())
    }

    /// Keep the `keep` most recent reports and delete the rest
    fn prune_reports(&self, keep: usize) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM reports WHERE uuid NOT IN (
                 SELECT uuid FROM reports ORDER BY stamp DESC, rowid DESC LIMIT ?1
             )",
            params![sql_limit(keep)],
        )?;
        if deleted > 0 {
            debug!(deleted, "pruned reports");
        }
        Ok(deleted)
    }

    /// Delete every session, item and report
    fn clear(&self) -> Result<()> {
        self.atomically(|conn| {
            conn.execute_batch(
                "DELETE FROM item_fields;
                 DELETE FROM items;
                 DELETE FROM sessions;
                 DELETE FROM reports;",
            )?;
            Ok(())
        })?;
        debug!("cleared snapshot store");
        Ok(())
    }

    /// Row counts
    fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn().query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            closed_sessions: count("SELECT COUNT(*) FROM sessions WHERE closed = 1")?,
            items: count("SELECT COUNT(*) FROM items")?,
            reports: count("SELECT COUNT(*) FROM reports")?,
        })
    }
}

fn query_sessions(conn: &Connection, filter: &str, limit: i64) -> Result<Vec<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions {} ORDER BY stamp DESC, rowid DESC LIMIT ?1",
        SESSION_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![limit])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

fn delete_session_rows(conn: &Connection, id: &str) -> Result<bool> {
    // Explicit child deletes keep this correct even without foreign key enforcement
    conn.execute("DELETE FROM item_fields WHERE sessionid = ?1", params![id])?;
    conn.execute("DELETE FROM items WHERE sessionid = ?1", params![id])?;
    let deleted = conn.execute("DELETE FROM sessions WHERE uuid = ?1", params![id])?;
    Ok(deleted > 0)
}

fn row_to_session(row: &Row<'_>) -> Result<Session> {
    let stamp: String = row.get("stamp")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let item_count: i64 = row.get("item_count")?;

    Ok(Session {
        id: row.get("uuid")?,
        stamp: parse_timestamp(&stamp)?,
        closed: row.get("closed")?,
        start_time: parse_timestamp(&start_time)?,
        end_time: end_time.as_deref().map(parse_timestamp).transpose()?,
        hostname: row.get("hostname")?,
        item_count: item_count.max(0) as u64,
    })
}

fn row_to_report(row: &Row<'_>) -> Result<Report> {
    let stamp: String = row.get("stamp")?;
    Ok(Report {
        id: row.get("uuid")?,
        stamp: parse_timestamp(&stamp)?,
        text: row.get("text")?,
        html: row.get("html")?,
        is_empty: row.get("is_empty")?,
        hostname: row.get("hostname")?,
    })
}

fn row_to_field(row: &Row<'_>) -> Result<(String, FieldValue)> {
    let name: String = row.get("name")?;
    let kind: String = row.get("kind")?;
    let value = FieldValue::decode(&kind, row.get("value")?)?;
    Ok((name, value))
}

/// `LIMIT` argument; counts beyond `i64::MAX` mean "no limit"
fn sql_limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| MonitorError::invalid_argument(format!("{} does not fit in i64", value)))
}
