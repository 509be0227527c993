//! Compute dispatcher: memoized, worker-isolated computation
//!
//! Each dispatch checks the result store for a memoized hit, and on a miss
//! runs the numeric engine inside an isolated worker, persists the outcome,
//! and records a request-audit entry either way. The store's uniqueness
//! constraint on (operation, parameters) resolves concurrent first-time
//! misses: exactly one result row survives, and every caller's audit entry
//! references it.

mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::engine::ComputeTask;
use crate::models::{NewAuditEntry, NewComputation, Operation, Parameters};
use crate::observability::ServiceMetrics;
use crate::store::{ResultStore, StoreError};

/// Errors surfaced to the API gateway. Domain messages pass through
/// verbatim; store conflicts never appear here (absorbed by the store).
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The numeric engine refused a mathematically invalid input.
    #[error("{0}")]
    Domain(String),
    /// The request was missing or malformed before any computation.
    #[error("{0}")]
    InvalidParameters(String),
    /// The isolated worker died or timed out without producing an outcome.
    #[error("{0}")]
    WorkerFailure(String),
    /// The persistence layer is unreachable; fatal for this request.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunables for the dispatcher.
///
/// Both limits default to off, matching the historical behavior of one
/// unbounded worker per request.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running workers.
    pub max_concurrent: Option<usize>,
    /// Per-computation wall-clock limit; exceeding it fails the request.
    pub compute_timeout: Option<Duration>,
}

/// Dispatches computations against the result store.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ResultStore>,
    metrics: ServiceMetrics,
    workers: Option<Arc<Semaphore>>,
    compute_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ResultStore>,
        metrics: ServiceMetrics,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            workers: config
                .max_concurrent
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            compute_timeout: config.compute_timeout,
        }
    }

    /// Resolve one computation request to its value.
    ///
    /// Returns the decimal text of the result; see [`ComputeError`] for the
    /// failure taxonomy. Nothing is persisted on any failure path.
    pub async fn dispatch(
        &self,
        operation: Operation,
        parameters: Parameters,
        requesting_user: &str,
    ) -> Result<String, ComputeError> {
        let key = parameters.canonical_key();

        if let Some(existing) = self.store.find_result(operation, &key).await? {
            self.metrics.inc_cache_hit();
            self.store
                .append_audit(NewAuditEntry {
                    result_id: existing.id,
                    requested_by: requesting_user.to_string(),
                    requested_at: Utc::now(),
                })
                .await?;
            info!(
                operation = %operation,
                parameters = %key,
                user = %requesting_user,
                cache_hit = true,
                "Serving memoized computation"
            );
            return Ok(existing.value);
        }

        self.metrics.inc_cache_miss();

        let task = ComputeTask::from_parameters(operation, &parameters)
            .map_err(|e| ComputeError::InvalidParameters(e.to_string()))?;

        let _permit = match &self.workers {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| ComputeError::WorkerFailure(e.to_string()))?,
            ),
            None => None,
        };

        self.metrics.inc_active_workers();
        let started = Instant::now();
        let outcome = worker::run_isolated(task, self.compute_timeout).await;
        let elapsed = started.elapsed();
        self.metrics.dec_active_workers();
        self.metrics.observe_compute_latency(elapsed.as_secs_f64());

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                if matches!(e, ComputeError::WorkerFailure(_)) {
                    self.metrics.inc_compute_error();
                    warn!(
                        operation = %operation,
                        parameters = %key,
                        error = %e,
                        "Computation worker failed"
                    );
                }
                return Err(e);
            }
        };

        let stored = self
            .store
            .record_result(NewComputation {
                operation,
                parameters_key: key.clone(),
                value: value.to_string(),
                calculation_time_us: elapsed.as_micros() as i64,
                owner_email: requesting_user.to_string(),
            })
            .await?;

        self.store
            .append_audit(NewAuditEntry {
                result_id: stored.id,
                requested_by: requesting_user.to_string(),
                requested_at: Utc::now(),
            })
            .await?;

        info!(
            operation = %operation,
            parameters = %key,
            user = %requesting_user,
            cache_hit = false,
            elapsed_us = elapsed.as_micros() as u64,
            "Computation complete"
        );

        // The stored row wins over our local value when another dispatcher
        // raced us to the same key; both are identical by determinism.
        Ok(stored.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn dispatcher(store: &SqliteStore) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store.clone()),
            ServiceMetrics::new(),
            DispatcherConfig::default(),
        )
    }

    fn count_params(count: i64) -> Parameters {
        Parameters::from_pairs([("count", count)])
    }

    #[tokio::test]
    async fn test_dispatch_computes_known_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);

        let cases = [
            (Operation::Prime, count_params(5), "11"),
            (Operation::Fibonacci, count_params(10), "21"),
            (Operation::Factorial, count_params(5), "120"),
            (
                Operation::Power,
                Parameters::from_pairs([("base", 2), ("exponent", 10)]),
                "1024",
            ),
            (Operation::SumOfNaturals, count_params(5), "15"),
        ];

        for (operation, params, expected) in cases {
            let value = dispatcher
                .dispatch(operation, params, "a@example.com")
                .await
                .unwrap();
            assert_eq!(value, expected, "{operation}");
        }
    }

    #[tokio::test]
    async fn test_dispatch_twice_memoizes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);
        let key = count_params(5).canonical_key();

        let first = dispatcher
            .dispatch(Operation::Prime, count_params(5), "a@example.com")
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(Operation::Prime, count_params(5), "b@example.com")
            .await
            .unwrap();

        assert_eq!(first, "11");
        assert_eq!(second, "11");
        assert_eq!(store.result_count(Operation::Prime, &key).await.unwrap(), 1);

        // Ownership stays with the original requester.
        let record = store
            .find_result(Operation::Prime, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.owner_email, "a@example.com");
        assert_eq!(store.audit_count(record.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_time_dispatches() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);
        let key = count_params(40).canonical_key();

        let mut handles = Vec::new();
        for i in 0..8 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        Operation::Fibonacci,
                        count_params(40),
                        &format!("user{i}@example.com"),
                    )
                    .await
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }

        assert!(values.iter().all(|v| v == &values[0]));
        assert_eq!(
            store.result_count(Operation::Fibonacci, &key).await.unwrap(),
            1
        );

        let record = store
            .find_result(Operation::Fibonacci, &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.audit_count(record.id).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_domain_error_persists_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);
        let key = count_params(0).canonical_key();

        let err = dispatcher
            .dispatch(Operation::Prime, count_params(0), "a@example.com")
            .await
            .unwrap_err();

        match err {
            ComputeError::Domain(msg) => assert_eq!(msg, "Count must be higher than 0"),
            other => panic!("expected domain error, got {other:?}"),
        }
        assert_eq!(store.result_count(Operation::Prime, &key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_power_domain_error_message() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);

        let err = dispatcher
            .dispatch(
                Operation::Power,
                Parameters::from_pairs([("base", 2), ("exponent", 0)]),
                "a@example.com",
            )
            .await
            .unwrap_err();

        match err {
            ComputeError::Domain(msg) => assert_eq!(msg, "Exponent must be higher than 0"),
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_parameter_is_input_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = dispatcher(&store);

        let err = dispatcher
            .dispatch(
                Operation::Power,
                Parameters::from_pairs([("base", 2)]),
                "a@example.com",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ComputeError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_bounded_workers_still_serve_all_requests() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            ServiceMetrics::new(),
            DispatcherConfig {
                max_concurrent: Some(2),
                compute_timeout: None,
            },
        );

        let mut handles = Vec::new();
        for count in 1..=6 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(Operation::Factorial, count_params(count), "a@example.com")
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
