//! SQLite-backed result store
//!
//! A single connection behind a mutex, driven from async code through
//! `spawn_blocking`. WAL journaling plus a busy timeout cover concurrent
//! writers from other processes sharing the database file.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{async_trait, ResultStore, StoreError};
use crate::models::{
    ComputationRecord, NewAuditEntry, NewComputation, Operation, ResourceSample, UserRecord,
};

/// Busy timeout for cross-process write contention (ms).
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS computation_results (
    id                  INTEGER PRIMARY KEY,
    operation           TEXT NOT NULL,
    parameters          TEXT NOT NULL,
    value               TEXT NOT NULL,
    calculation_time_us INTEGER NOT NULL,
    owner_email         TEXT NOT NULL,
    created_at          INTEGER NOT NULL,
    UNIQUE (operation, parameters)
);

CREATE TABLE IF NOT EXISTS computation_requests (
    id           INTEGER PRIMARY KEY,
    result_id    INTEGER NOT NULL REFERENCES computation_results (id),
    requested_by TEXT NOT NULL,
    requested_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_result
    ON computation_requests (result_id);

CREATE TABLE IF NOT EXISTS resource_samples (
    id          INTEGER PRIMARY KEY,
    sampled_at  INTEGER NOT NULL,
    cpu_percent REAL NOT NULL,
    ram_percent REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_sampled_at
    ON resource_samples (sampled_at);
";

/// SQLite-backed [`ResultStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!(path = %path.display(), "Opened result store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .map_err(StoreError::from)
    }

    /// Register a user with a hashed password. Returns the stored row.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, StoreError> {
        let email = email.to_string();
        let digest = password_digest(password);
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_micros();
            conn.execute(
                "INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (email) DO NOTHING",
                params![email, digest, now],
            )?;
            conn.query_row(
                "SELECT id, email, created_at FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
        })
        .await
    }

    /// Number of stored results for a cache key. Test and diagnostics aid.
    pub async fn result_count(
        &self,
        operation: Operation,
        parameters_key: &str,
    ) -> Result<i64, StoreError> {
        let key = parameters_key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM computation_results
                 WHERE operation = ?1 AND parameters = ?2",
                params![operation.as_str(), key],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Number of audit entries referencing a result.
    pub async fn audit_count(&self, result_id: i64) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM computation_requests WHERE result_id = ?1",
                params![result_id],
                |row| row.get(0),
            )
        })
        .await
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn find_result(
        &self,
        operation: Operation,
        parameters_key: &str,
    ) -> Result<Option<ComputationRecord>, StoreError> {
        let key = parameters_key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, operation, parameters, value, calculation_time_us,
                        owner_email, created_at
                 FROM computation_results
                 WHERE operation = ?1 AND parameters = ?2",
                params![operation.as_str(), key],
                record_from_row,
            )
            .optional()
        })
        .await
    }

    async fn record_result(&self, new: NewComputation) -> Result<ComputationRecord, StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_micros();
            // Exactly one row per key: losers of a concurrent first-time
            // race hit the unique constraint and re-read the winner.
            conn.execute(
                "INSERT INTO computation_results
                     (operation, parameters, value, calculation_time_us,
                      owner_email, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (operation, parameters) DO NOTHING",
                params![
                    new.operation.as_str(),
                    new.parameters_key,
                    new.value,
                    new.calculation_time_us,
                    new.owner_email,
                    now
                ],
            )?;
            conn.query_row(
                "SELECT id, operation, parameters, value, calculation_time_us,
                        owner_email, created_at
                 FROM computation_results
                 WHERE operation = ?1 AND parameters = ?2",
                params![new.operation.as_str(), new.parameters_key],
                record_from_row,
            )
        })
        .await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO computation_requests (result_id, requested_by, requested_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    entry.result_id,
                    entry.requested_by,
                    entry.requested_at.timestamp_micros()
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn append_sample(&self, sample: ResourceSample) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO resource_samples (sampled_at, cpu_percent, ram_percent)
                 VALUES (?1, ?2, ?3)",
                params![
                    sample.sampled_at.timestamp_micros(),
                    sample.cpu_percent as f64,
                    sample.ram_percent as f64
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn samples_in_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResourceSample>, StoreError> {
        let start_us = start.map(|t| t.timestamp_micros()).unwrap_or(i64::MIN);
        let end_us = end.map(|t| t.timestamp_micros()).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sampled_at, cpu_percent, ram_percent
                 FROM resource_samples
                 WHERE sampled_at >= ?1 AND sampled_at <= ?2
                 ORDER BY sampled_at ASC",
            )?;
            let rows = stmt.query_map(params![start_us, end_us], |row| {
                Ok(ResourceSample {
                    sampled_at: micros_to_datetime(row.get(0)?),
                    cpu_percent: row.get::<_, f64>(1)? as f32,
                    ram_percent: row.get::<_, f64>(2)? as f32,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn find_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_string();
        let digest = password_digest(password);
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, email, created_at FROM users
                 WHERE email = ?1 AND password_hash = ?2",
                params![email, digest],
                user_from_row,
            )
            .optional()
        })
        .await
    }
}

fn record_from_row(row: &Row<'_>) -> Result<ComputationRecord, rusqlite::Error> {
    let operation: String = row.get(1)?;
    let operation = Operation::from_str(&operation).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ComputationRecord {
        id: row.get(0)?,
        operation,
        parameters_key: row.get(2)?,
        value: row.get(3)?,
        calculation_time_us: row.get(4)?,
        owner_email: row.get(5)?,
        created_at: micros_to_datetime(row.get(6)?),
    })
}

fn user_from_row(row: &Row<'_>) -> Result<UserRecord, rusqlite::Error> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        created_at: micros_to_datetime(row.get(2)?),
    })
}

// Timestamps are written by this store and always in range.
fn micros_to_datetime(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Parameters;

    fn sample_at(us: i64) -> ResourceSample {
        ResourceSample {
            sampled_at: micros_to_datetime(us),
            cpu_percent: 12.5,
            ram_percent: 40.0,
        }
    }

    fn new_result(key: &str, value: &str) -> NewComputation {
        NewComputation {
            operation: Operation::Prime,
            parameters_key: key.to_string(),
            value: value.to_string(),
            calculation_time_us: 150,
            owner_email: "a@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_result_is_idempotent_per_key() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.record_result(new_result("count=5", "11")).await.unwrap();
        let second = store
            .record_result(new_result("count=5", "999"))
            .await
            .unwrap();

        // The winner's row is returned; the duplicate write is discarded.
        assert_eq!(second.id, first.id);
        assert_eq!(second.value, "11");
        assert_eq!(
            store.result_count(Operation::Prime, "count=5").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_record_result_keeps_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.record_result(new_result("count=7", "17")).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(
            store.result_count(Operation::Prime, "count=7").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_find_result_misses_then_hits() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Parameters::from_pairs([("count", 5)]).canonical_key();

        assert!(store
            .find_result(Operation::Prime, &key)
            .await
            .unwrap()
            .is_none());

        store.record_result(new_result(&key, "11")).await.unwrap();

        let found = store
            .find_result(Operation::Prime, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.operation, Operation::Prime);
        assert_eq!(found.parameters_key, key);
        assert_eq!(found.value, "11");
        assert_eq!(found.calculation_time_us, 150);
    }

    #[tokio::test]
    async fn test_result_keys_are_distinct_per_operation() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.record_result(new_result("count=5", "11")).await.unwrap();
        let mut other = new_result("count=5", "120");
        other.operation = Operation::Factorial;
        store.record_result(other).await.unwrap();

        assert!(store
            .find_result(Operation::Factorial, "count=5")
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store.result_count(Operation::Prime, "count=5").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_audit_entries_accumulate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.record_result(new_result("count=5", "11")).await.unwrap();

        for _ in 0..3 {
            store
                .append_audit(NewAuditEntry {
                    result_id: result.id,
                    requested_by: "a@example.com".to_string(),
                    requested_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.audit_count(result.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_samples_in_range_is_inclusive_and_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (t1, t2, t3) = (1_000_000, 2_000_000, 3_000_000);
        for t in [t1, t2, t3] {
            store.append_sample(sample_at(t)).await.unwrap();
        }

        let samples = store
            .samples_in_range(Some(micros_to_datetime(t2)), Some(micros_to_datetime(t3)))
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].sampled_at, micros_to_datetime(t2));
        assert_eq!(samples[1].sampled_at, micros_to_datetime(t3));
    }

    #[tokio::test]
    async fn test_samples_open_bounds_return_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        for t in [1_000_000, 2_000_000] {
            store.append_sample(sample_at(t)).await.unwrap();
        }

        let samples = store.samples_in_range(None, None).await.unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    async fn test_user_credentials() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_user("a@example.com", "secret").await.unwrap();

        let found = store.find_user("a@example.com", "secret").await.unwrap();
        assert_eq!(found.unwrap().email, "a@example.com");

        assert!(store
            .find_user("a@example.com", "wrong")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_user("b@example.com", "secret")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.record_result(new_result("count=5", "11")).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let found = reopened
            .find_result(Operation::Prime, "count=5")
            .await
            .unwrap();
        assert_eq!(found.unwrap().value, "11");
    }
}
