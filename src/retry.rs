//! Retrying execution of document operations on pooled handles

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::config::RetryPolicy;
use crate::errors::{ErrorClass, OperationError, PoolError, PoolResult};
use crate::operation::{DocumentStore, Operation};
use crate::pool::ConnectionPool;

/// Runs [`Operation`]s against the pool with classified, backed-off retries
pub struct RetryExecutor<D: DocumentStore> {
    pool: ConnectionPool<D>,
    policy: RetryPolicy,
}

impl<D: DocumentStore> Clone for RetryExecutor<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<D: DocumentStore> RetryExecutor<D> {
    /// Executor over `pool`; fails if `policy` is invalid
    pub fn new(pool: ConnectionPool<D>, policy: RetryPolicy) -> PoolResult<Self> {
        policy.validate()?;
        Ok(Self { pool, policy })
    }

    /// Pool operations are run against
    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// `PoolExhausted` is returned as soon as acquisition times out; the pool
    /// has already waited. Non-retryable and unexpected failures end the call
    /// on first occurrence. Every attempt releases its handle exactly once.
    pub async fn execute(&self, operation: Operation) -> PoolResult<Value> {
        let kind = operation.kind();
        let max_attempts = self.policy.max_attempts;
        let mut last_error: Option<OperationError> = None;

        for attempt in 1..=max_attempts {
            let handle = self.pool.acquire().await?;
            let id = handle.id();

            let err = match self.pool.store().perform(handle.session(), &operation).await {
                Ok(document) => {
                    handle.mark_success();
                    debug!(handle = %id, %kind, attempt, "operation succeeded");
                    return Ok(document);
                }
                Err(err) => err,
            };

            let class = self.policy.classify(&err);
            handle.report_error().await;

            match class {
                ErrorClass::NonRetryable => {
                    warn!(handle = %id, %kind, attempt, error = %err, "non-retryable failure");
                    return Err(PoolError::NonRetryable(err));
                }
                ErrorClass::Unexpected => {
                    error!(handle = %id, %kind, attempt, error = %err, "unexpected failure");
                    return Err(PoolError::Unexpected(err));
                }
                ErrorClass::Retryable => {
                    warn!(handle = %id, %kind, attempt, max_attempts, error = %err, "attempt failed");
                    last_error = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff_for(attempt)).await;
                    }
                }
            }
        }

        Err(PoolError::RetryExhausted {
            attempts: max_attempts,
            last: last_error
                .unwrap_or_else(|| OperationError::unexpected("no attempt was made")),
        })
    }

    /// Run [`execute`](Self::execute) on a spawned task.
    ///
    /// The caller can await the returned handle or abort it; aborting releases
    /// any handle the task holds.
    pub fn execute_async(&self, operation: Operation) -> JoinHandle<PoolResult<Value>> {
        let executor = self.clone();
        let span = info_span!("execute", kind = %operation.kind(), collection = operation.collection());
        tokio::spawn(async move { executor.execute(operation).await }.instrument(span))
    }
}

/// Await a spawned execution, mapping abort or panic to [`PoolError::Cancelled`]
pub async fn join_execution(task: JoinHandle<PoolResult<Value>>) -> PoolResult<Value> {
    task.await.map_err(|_| PoolError::Cancelled)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfiguration;
    use crate::testing::{ScriptedStore, read_op};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    async fn executor(store: Arc<ScriptedStore>, capacity: usize) -> RetryExecutor<Arc<ScriptedStore>> {
        let pool = ConnectionPool::connect(store, PoolConfiguration::new().with_capacity(capacity))
            .await
            .unwrap();
        RetryExecutor::new(pool, RetryPolicy::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_and_releases() {
        let store = Arc::new(ScriptedStore::new());
        let executor = executor(store.clone(), 2).await;

        let result = executor.execute(read_op()).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(store.performs(), 1);
        assert_eq!(executor.pool().stats().busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_is_attempted_once() {
        let store = Arc::new(ScriptedStore::new());
        store.script_perform(std::iter::repeat_n(Err(OperationError::status(403, "forbidden")), 3));
        let executor = executor(store.clone(), 2).await;

        let err = executor.execute(read_op()).await.unwrap_err();
        assert!(matches!(err, PoolError::NonRetryable(_)), "got {err:?}");
        assert_eq!(store.performs(), 1);
        assert_eq!(executor.pool().stats().busy, 0);
        assert_eq!(executor.pool().handles()[0].error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_failure_is_fatal() {
        let store = Arc::new(ScriptedStore::new());
        store.script_perform([Err(OperationError::unexpected("decode error"))]);
        let executor = executor(store.clone(), 2).await;

        let err = executor.execute(read_op()).await.unwrap_err();
        assert!(matches!(err, PoolError::Unexpected(_)), "got {err:?}");
        assert_eq!(store.performs(), 1);
        assert_eq!(executor.pool().stats().busy, 0);
        assert_eq!(executor.pool().handles()[0].error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_exponentially() {
        let store = Arc::new(ScriptedStore::new());
        store.script_perform([
            Err(OperationError::transient("timeout")),
            Err(OperationError::status(503, "unavailable")),
            Ok(json!({"id": "doc-1"})),
        ]);
        let executor = executor(store.clone(), 2).await;

        let result = executor.execute(read_op()).await.unwrap();
        assert_eq!(result, json!({"id": "doc-1"}));

        let calls = store.perform_times();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(
            first_gap >= Duration::from_millis(500) && first_gap < Duration::from_millis(550),
            "first backoff {first_gap:?}"
        );
        assert!(
            second_gap >= Duration::from_millis(1000) && second_gap < Duration::from_millis(1050),
            "second backoff {second_gap:?}"
        );
        // success clears the tally
        assert_eq!(executor.pool().handles()[0].error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_carry_last_error() {
        let store = Arc::new(ScriptedStore::new());
        store.script_perform([
            Err(OperationError::transient("one")),
            Err(OperationError::transient("two")),
            Err(OperationError::transient("three")),
            Ok(json!({})),
        ]);
        let executor = executor(store.clone(), 2).await;

        let err = executor.execute(read_op()).await.unwrap_err();
        match err {
            PoolError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, OperationError::transient("three"));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(store.performs(), 3);
        // third error on the same handle crossed the refresh threshold
        assert_eq!(store.connects(), 3);
        assert_eq!(executor.pool().metrics().refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_exhaustion_is_not_retried() {
        let store = Arc::new(ScriptedStore::new());
        let pool = ConnectionPool::connect(
            store.clone(),
            PoolConfiguration::new()
                .with_capacity(1)
                .with_max_wait_time(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let executor = RetryExecutor::new(pool.clone(), RetryPolicy::default()).unwrap();

        let _held = pool.acquire().await.unwrap();
        let started = Instant::now();
        let err = executor.execute(read_op()).await.unwrap_err();

        assert!(matches!(err, PoolError::PoolExhausted(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_millis(1100));
        assert_eq!(store.performs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_execution_leaves_no_busy_handle() {
        let store = Arc::new(ScriptedStore::new());
        store.hang_performs(true);
        let executor = executor(store.clone(), 2).await;

        let task = executor.execute_async(read_op());
        while store.performs() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(executor.pool().stats().busy, 1);

        task.abort();
        let err = join_execution(task).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(executor.pool().stats().busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_async_returns_result() {
        let store = Arc::new(ScriptedStore::new());
        let executor = executor(store.clone(), 2).await;

        let task = executor.execute_async(read_op());
        let result = join_execution(task).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
