//! Result store: memoized computations, request audit log, resource samples
//!
//! The store is the sole owner of persistence for the dispatcher and the
//! background sampler. Memoization correctness rests on a storage-level
//! uniqueness constraint on (operation, parameters), not on application
//! locking, so the invariant holds even when several server processes share
//! one database.

mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    ComputationRecord, NewAuditEntry, NewComputation, ResourceSample, UserRecord,
};

pub use async_trait::async_trait;

/// Persistence failures surfaced to callers.
///
/// Write conflicts on the memoization key are absorbed internally by
/// [`ResultStore::record_result`] and never appear here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence boundary for computation results, audit entries, resource
/// samples and user lookup.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Look up a memoized result by its cache identity.
    async fn find_result(
        &self,
        operation: crate::models::Operation,
        parameters_key: &str,
    ) -> Result<Option<ComputationRecord>, StoreError>;

    /// Persist a result unless one already exists for the same key.
    ///
    /// Returns the stored row; when a concurrent writer won the race for
    /// the same (operation, parameters) key, that winner's row is returned
    /// and the given result is discarded.
    async fn record_result(&self, new: NewComputation) -> Result<ComputationRecord, StoreError>;

    /// Append one request-audit entry referencing an existing result.
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError>;

    /// Append one host resource sample.
    async fn append_sample(&self, sample: ResourceSample) -> Result<(), StoreError>;

    /// Samples within the inclusive `[start, end]` range, ascending by
    /// timestamp. Open bounds are unbounded.
    async fn samples_in_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ResourceSample>, StoreError>;

    /// Credential check for the login endpoint.
    async fn find_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, StoreError>;
}
