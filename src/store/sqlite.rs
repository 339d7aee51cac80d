use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{LinkpeekError, Result};
use crate::store::{CacheEntry, CacheStore};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;

        migrations
            .to_latest(&mut conn)
            .map_err(|_| LinkpeekError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            LinkpeekError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }
}

impl CacheStore for SqliteStore {
    fn get_entry(&self, kind: &str, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;

        let entry = conn
            .query_row(
                "SELECT kind, key, payload, last_fetched, ttl_secs
                 FROM cache_entries WHERE kind = ?1 AND key = ?2",
                params![kind, key],
                |row| {
                    Ok(CacheEntry {
                        kind: row.get(0)?,
                        key: row.get(1)?,
                        payload: row.get(2)?,
                        // An unparseable timestamp reads as the epoch, so the entry expires
                        last_fetched: row
                            .get::<_, String>(3)
                            .ok()
                            .and_then(|s| Self::parse_datetime(&s))
                            .unwrap_or_default(),
                        ttl_secs: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(entry)
    }

    fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO cache_entries (kind, key, payload, last_fetched, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, key) DO UPDATE SET
                payload = excluded.payload,
                last_fetched = excluded.last_fetched,
                ttl_secs = excluded.ttl_secs",
            params![
                entry.kind,
                entry.key,
                entry.payload,
                entry.last_fetched.to_rfc3339(),
                entry.ttl_secs
            ],
        )?;

        Ok(())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT kind, key, last_fetched, ttl_secs FROM cache_entries")?;
        let stale = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, _, last_fetched, ttl)| match Self::parse_datetime(last_fetched) {
                Some(at) => now.signed_duration_since(at).num_seconds() > *ttl,
                None => true,
            })
            .collect::<Vec<_>>();
        drop(stmt);

        let mut removed = 0;
        for (kind, key, _, _) in &stale {
            removed += conn.execute(
                "DELETE FROM cache_entries WHERE kind = ?1 AND key = ?2",
                params![kind, key],
            )?;
        }

        Ok(removed)
    }

    fn count_entries(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
