use crate::error::{MonitorError, Result};
use rusqlite::{Connection, Transaction};
use tracing::debug;

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`] inside one transaction
pub(crate) fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(MonitorError::internal(format!(
            "database version ({}) is newer than supported schema ({})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        debug!("applied schema migration v{}", next_version);
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schema_v1.sql"))?;
            Ok(())
        }
        other => Err(MonitorError::internal(format!("unknown schema version {}", other))),
    }
}
