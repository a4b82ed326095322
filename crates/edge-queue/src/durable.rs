//! Durable Spill Queue (C9): a SQLite-backed LIFO that absorbs backpressure
//! the volatile queue can't hold without risking unbounded RAM during a
//! long outage.

use rusqlite::Connection;
use std::path::Path;

use edge_model::Readout;

#[derive(Debug)]
pub enum DurableQueueError {
    Sqlite(rusqlite::Error),
    IntegrityCheckFailed(String),
    Corrupt(String),
}

impl std::fmt::Display for DurableQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurableQueueError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            DurableQueueError::IntegrityCheckFailed(s) => write!(f, "integrity check failed: {s}"),
            DurableQueueError::Corrupt(s) => write!(f, "corrupt spill row: {s}"),
        }
    }
}

impl std::error::Error for DurableQueueError {}

impl From<rusqlite::Error> for DurableQueueError {
    fn from(e: rusqlite::Error) -> Self {
        DurableQueueError::Sqlite(e)
    }
}

/// A fatal-at-startup failure per §7: a corrupt spill database is never
/// silently recreated, since that would quietly drop readings the
/// delivery guarantee in §8 promises to keep.
pub struct DurableQueue {
    conn: Connection,
}

impl DurableQueue {
    pub fn open(path: &Path) -> Result<Self, DurableQueueError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;",
        )?;
        let check: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if check != "ok" {
            return Err(DurableQueueError::IntegrityCheckFailed(check));
        }
        conn.execute_batch("CREATE TABLE IF NOT EXISTS queue (id INTEGER PRIMARY KEY AUTOINCREMENT, item TEXT NOT NULL)")?;
        Ok(DurableQueue { conn })
    }

    pub fn put(&self, readout: &Readout) -> Result<(), DurableQueueError> {
        self.conn
            .execute("INSERT INTO queue (item) VALUES (?1)", [readout.to_compact_string()])?;
        Ok(())
    }

    /// Pop the most recently inserted row (LIFO), atomically.
    pub fn get(&self) -> Result<Option<Readout>, DurableQueueError> {
        let row = self.conn.query_row(
            "SELECT id, item FROM queue ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
        );
        let (id, item) = match row {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.conn.execute("DELETE FROM queue WHERE id = ?1", [id])?;
        let json: serde_json::Value = serde_json::from_str(&item).map_err(|e| DurableQueueError::Corrupt(e.to_string()))?;
        Readout::from_json(&json)
            .map(Some)
            .ok_or_else(|| DurableQueueError::Corrupt(format!("row {id} did not decode as a readout")))
    }

    pub fn size(&self) -> Result<i64, DurableQueueError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM queue", [], |r| r.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::readout::{DeviceReading, Metadata};

    fn readout(t: i64) -> Readout {
        Readout { t, r: vec![DeviceReading::new("meter1")], m: Metadata::default() }
    }

    #[test]
    fn round_trips_and_pops_lifo() {
        let dir = tempfile::tempdir().unwrap();
        let dq = DurableQueue::open(&dir.path().join("spill.db")).unwrap();
        dq.put(&readout(1)).unwrap();
        dq.put(&readout(2)).unwrap();
        assert_eq!(dq.size().unwrap(), 2);
        let popped = dq.get().unwrap().unwrap();
        assert_eq!(popped.t, 2);
        assert_eq!(dq.size().unwrap(), 1);
    }

    #[test]
    fn get_on_empty_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let dq = DurableQueue::open(&dir.path().join("spill.db")).unwrap();
        assert!(dq.get().unwrap().is_none());
    }
}
