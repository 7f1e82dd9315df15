//! `SQLite` storage layer for Cairn.
//!
//! One database file holds the workspace registry, file records, the entity
//! graph, and entity vectors, every row tagged with its storage namespace.
//! Writes go through a single writer connection; reads use a second
//! connection so graph queries never wait behind a reindex (WAL mode).
//!
//! ## Module Structure
//!
//! - `schema` - Database schema (DDL and isolation triggers)
//! - `helpers` - Row conversion and parsing utilities
//! - `workspaces` - Registry persistence
//! - `files` - File records and the atomic per-file write
//! - `entities` - Entity lookups
//! - `relationships` - Name resolution, relinking, edge lookups
//! - `vectors` - Embedding storage and similarity search
//! - `graph` - Recursive traversals (`GraphQueries`)

mod entities;
mod files;
mod graph;
mod helpers;
mod relationships;
mod schema;
mod vectors;
mod workspaces;

pub(crate) use helpers::{ENTITY_COLUMNS, row_to_entity};
pub(crate) use schema::SCHEMA;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::types::WorkspaceStats;

/// How long `SQLite` itself waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// `SQLite` database wrapper for the Cairn index.
///
/// The writer and reader connections are each wrapped in a `Mutex`: a
/// `rusqlite::Connection` is `Send` but not `Sync`.
pub struct Index {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Index {
    /// Open or create the index database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        tracing::debug!(path = %path.display(), "Opened index database");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the writer connection.
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|e| {
            Error::Internal(format!(
                "writer connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    /// Acquire the read-only connection.
    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|e| {
            Error::Internal(format!(
                "reader connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    /// Get the current unix timestamp in nanoseconds.
    // u128 nanoseconds won't exceed i64::MAX until year 2262
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) fn now_ns() -> Result<i64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .map_err(|e| {
                Error::Config(format!(
                    "System clock is before Unix epoch: {e}. Fix system time before indexing."
                ))
            })
    }

    /// Delete every file, entity, relationship, and vector of a namespace.
    ///
    /// The workspace registration itself is kept.
    pub fn clear_namespace(&self, namespace: &str) -> Result<()> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let vectors = tx.execute("DELETE FROM vectors WHERE namespace = ?1", [namespace])?;
        let relationships =
            tx.execute("DELETE FROM relationships WHERE namespace = ?1", [namespace])?;
        let entities = tx.execute("DELETE FROM entities WHERE namespace = ?1", [namespace])?;
        let files = tx.execute("DELETE FROM files WHERE namespace = ?1", [namespace])?;
        tx.commit()?;

        tracing::info!(
            namespace,
            files,
            entities,
            relationships,
            vectors,
            "Cleared namespace"
        );
        Ok(())
    }

    /// Get statistics about one namespace.
    pub fn stats(&self, workspace: &str, namespace: &str) -> Result<WorkspaceStats> {
        let conn = self.reader()?;

        let files: usize = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE namespace = ?1",
            [namespace],
            |row| row.get(0),
        )?;

        let entities_by_kind = count_by_kind(
            &conn,
            "SELECT kind, COUNT(*) FROM entities WHERE namespace = ?1 GROUP BY kind",
            namespace,
        )?;
        let relationships_by_kind = count_by_kind(
            &conn,
            "SELECT kind, COUNT(*) FROM relationships WHERE namespace = ?1 GROUP BY kind",
            namespace,
        )?;

        let unresolved_relationships: usize = conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE namespace = ?1 AND to_entity IS NULL",
            [namespace],
            |row| row.get(0),
        )?;
        let vectors: usize = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE namespace = ?1",
            [namespace],
            |row| row.get(0),
        )?;

        Ok(WorkspaceStats {
            workspace: workspace.to_string(),
            files,
            entities_by_kind,
            relationships_by_kind,
            unresolved_relationships,
            vectors,
        })
    }

    /// Update `SQLite` query planner statistics.
    ///
    /// Worth calling after a full rebuild; not needed after small incremental updates.
    pub fn analyze(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute_batch("ANALYZE")?;
        Ok(())
    }
}

fn count_by_kind(
    conn: &Connection,
    sql: &str,
    namespace: &str,
) -> Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([namespace], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
    })?;
    Ok(rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()?)
}

/// Translate an isolation trigger failure into [`Error::ContextMismatch`].
///
/// Other errors pass through unchanged.
pub(crate) fn context_error(err: rusqlite::Error, expected: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err
        && message.starts_with("context mismatch")
    {
        return Error::ContextMismatch {
            expected: expected.to_string(),
            found: message.clone(),
        };
    }
    Error::Database(err)
}
