//! Local metadata cache (C6).
//!
//! An embedded SQLite database, kept entirely outside the repository itself,
//! that lets `put` skip re-chunking a directory entry whose path, mtime,
//! mode, and size haven't changed since the id it produced was last
//! recorded. The cache is advisory: a missing, stale, or corrupt cache file
//! degrades to "re-chunk everything" rather than ever causing a backup to
//! fail or a read to return wrong bytes.
//!
//! Grounded on `examples/original_source/src/rekord/repository_write.cc`'s
//! `stats` table lookup (`SELECT mtime, mode, size, id FROM stats WHERE
//! path=?1`) and on `other_examples`' `televy-backup` crate, which keeps an
//! analogous index in a `sqlx::SqlitePool`; `rusqlite` is used here instead
//! since the rest of the engine is worker-pool/blocking-task based rather
//! than async-all-the-way-down for this kind of embedded store.

use crate::oid::Oid;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

const SCHEMA_V1: &str = r#"
CREATE TABLE stats (
    path TEXT PRIMARY KEY,
    mtime INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    size INTEGER NOT NULL,
    id BLOB NOT NULL
);
CREATE TABLE objects (
    id BLOB PRIMARY KEY
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedStat {
    pub mtime: i64,
    pub mode: u32,
    pub size: i64,
    pub id: Oid,
}

pub struct Cache {
    conn: Mutex<Connection>,
}

impl Cache {
    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < 1 {
            conn.execute_batch(SCHEMA_V1)?;
            conn.pragma_update(None, "user_version", 1)?;
        }
        Ok(())
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Self {
        Self::from_connection(Connection::open_in_memory().expect("in-memory sqlite never fails to open"))
            .expect("schema migration on a fresh database never fails")
    }

    /// Opens the cache file at `path`, creating it if absent. Falls back to
    /// an empty in-memory cache on any error — a broken cache degrades
    /// performance, never correctness.
    pub fn open_or_empty(path: &Path) -> Self {
        match Connection::open(path).and_then(|conn| {
            Self::migrate(&conn)?;
            Ok(conn)
        }) {
            Ok(conn) => Self { conn: Mutex::new(conn) },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata cache unusable, starting with an empty one");
                Self::in_memory()
            }
        }
    }

    /// Looks up the last recorded `(mtime, mode, size, id)` for `path`. The
    /// caller is responsible for comparing the live stat against this
    /// before trusting `id`.
    pub fn lookup(&self, path: &str) -> Option<CachedStat> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT mtime, mode, size, id FROM stats WHERE path = ?1",
            params![path],
            |row| {
                let mtime: i64 = row.get(0)?;
                let mode: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                let id: Vec<u8> = row.get(3)?;
                Ok((mtime, mode, size, id))
            },
        )
        .optional()
        .unwrap_or_else(|e| {
            warn!(path, error = %e, "metadata cache lookup failed, treating as a miss");
            None
        })
        .and_then(|(mtime, mode, size, id_bytes)| {
            let id: [u8; 32] = id_bytes.try_into().ok()?;
            Some(CachedStat {
                mtime,
                mode: mode as u32,
                size,
                id: Oid::from_bytes(id),
            })
        })
    }

    pub fn record(&self, path: &str, mtime: i64, mode: u32, size: i64, id: Oid) {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO stats (path, mtime, mode, size, id) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET mtime = excluded.mtime, mode = excluded.mode,
             size = excluded.size, id = excluded.id",
            params![path, mtime, mode as i64, size, id.as_bytes().to_vec()],
        );
        if let Err(e) = result {
            warn!(path, error = %e, "metadata cache write failed, continuing without it");
        }
    }

    /// Whether `id` is known to already exist in the repository, so a
    /// redundant `Backend::write` can be skipped.
    pub fn has_object(&self, id: &Oid) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM objects WHERE id = ?1",
            params![id.as_bytes().to_vec()],
            |_| Ok(()),
        )
        .optional()
        .unwrap_or(None)
        .is_some()
    }

    pub fn record_object(&self, id: &Oid) {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT OR IGNORE INTO objects (id) VALUES (?1)",
            params![id.as_bytes().to_vec()],
        );
        if let Err(e) = result {
            warn!(oid = %id, error = %e, "metadata cache write failed, continuing without it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_looks_up_a_stat() {
        let cache = Cache::in_memory();
        let oid = Oid::from_bytes([3u8; 32]);
        assert!(cache.lookup("a/b.txt").is_none());
        cache.record("a/b.txt", 100, 0o644, 1234, oid);
        let cached = cache.lookup("a/b.txt").unwrap();
        assert_eq!(cached.mtime, 100);
        assert_eq!(cached.mode, 0o644);
        assert_eq!(cached.size, 1234);
        assert_eq!(cached.id, oid);
    }

    #[test]
    fn re_recording_overwrites() {
        let cache = Cache::in_memory();
        let oid_a = Oid::from_bytes([1u8; 32]);
        let oid_b = Oid::from_bytes([2u8; 32]);
        cache.record("f", 1, 0o644, 10, oid_a);
        cache.record("f", 2, 0o644, 20, oid_b);
        let cached = cache.lookup("f").unwrap();
        assert_eq!(cached.id, oid_b);
        assert_eq!(cached.mtime, 2);
    }

    #[test]
    fn object_presence_tracking() {
        let cache = Cache::in_memory();
        let oid = Oid::from_bytes([9u8; 32]);
        assert!(!cache.has_object(&oid));
        cache.record_object(&oid);
        assert!(cache.has_object(&oid));
    }

    #[test]
    fn broken_cache_path_degrades_to_empty_rather_than_failing() {
        let cache = Cache::open_or_empty(Path::new("/nonexistent/dir/that/cannot/be/created/cache.db"));
        assert!(cache.lookup("anything").is_none());
    }
}
