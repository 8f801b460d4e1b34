use std::path::Path;

use noraids_core::now_unix_millis;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::schema;

/// One row of the gate journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateEvent {
    pub id: i64,
    pub handle: String,
    pub action: String,
    pub outcome: String,
    pub detail: String,
    pub created_at: u64,
}

/// A gate journal entry before insertion.
#[derive(Clone, Debug)]
pub struct NewGateEvent<'a> {
    pub handle: &'a str,
    pub action: &'a str,
    pub outcome: &'a str,
    pub detail: &'a str,
    pub created_at: u64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Schema version recorded at open, `None` for a database this build never initialized.
    pub fn schema_version(&self) -> Result<Option<i64>> {
        schema::get_schema_version(&self.conn)
    }

    // --- Key-value ---

    pub fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, value, now_unix_millis() as i64],
        )?;
        Ok(())
    }

    /// Returns whether a value was removed.
    pub fn kv_delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(n > 0)
    }

    // --- Gate journal ---

    pub fn record_gate_event(&self, event: &NewGateEvent<'_>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO gate_events (handle, action, outcome, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.handle.to_lowercase(),
                event.action,
                event.outcome,
                event.detail,
                event.created_at as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent journal entries first.
    pub fn recent_gate_events(&self, limit: usize) -> Result<Vec<GateEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, handle, action, outcome, detail, created_at
             FROM gate_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], row_to_gate_event)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    pub fn gate_events_for(&self, handle: &str, limit: usize) -> Result<Vec<GateEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, handle, action, outcome, detail, created_at
             FROM gate_events WHERE handle = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![handle.to_lowercase(), limit as i64],
                row_to_gate_event,
            )?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Flush the WAL into the main database file and truncate it.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.checkpoint_truncate() {
            tracing::debug!("WAL checkpoint on close failed: {e}");
        }
    }
}

fn row_to_gate_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<GateEvent> {
    Ok(GateEvent {
        id: row.get(0)?,
        handle: row.get(1)?,
        action: row.get(2)?,
        outcome: row.get(3)?,
        detail: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}
