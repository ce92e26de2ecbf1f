// docpool demo
// Drives an in-memory, occasionally failing document store through the
// pool, the retry executor, the health auditor and the sweeper.
//
// Run with: RUST_LOG=docpool=debug cargo run

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docpool::{
    ConnectionPool, DocumentStore, HealthAuditor, MaintenanceSweeper, Operation, OperationError,
    PoolConfiguration, PoolResult, RetryExecutor, RetryPolicy, join_execution,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Documents keyed by (collection, id); every `fail_every`-th call times out
struct MemoryStore {
    documents: Mutex<BTreeMap<(String, String), Value>>,
    calls: AtomicUsize,
    sessions: AtomicUsize,
    fail_every: usize,
}

impl MemoryStore {
    fn new(fail_every: usize) -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            fail_every,
        }
    }
}

fn key(collection: &str, id: &str) -> (String, String) {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Session = usize;

    async fn connect(&self) -> Result<usize, OperationError> {
        Ok(self.sessions.fetch_add(1, Ordering::Relaxed))
    }

    async fn perform(&self, _session: &usize, operation: &Operation) -> Result<Value, OperationError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call % self.fail_every == 0 {
            return Err(OperationError::transient("simulated timeout"));
        }

        let mut documents = self.documents.lock();
        match operation {
            Operation::Create {
                collection,
                document_id,
                data,
            }
            | Operation::Update {
                collection,
                document_id,
                data,
            } => {
                documents.insert(key(collection, document_id), data.clone());
                Ok(json!({"$id": document_id}))
            }
            Operation::Read {
                collection,
                document_id,
            } => documents
                .get(&key(collection, document_id))
                .cloned()
                .ok_or_else(|| OperationError::status(404, "document not found")),
            Operation::Delete {
                collection,
                document_id,
            } => documents
                .remove(&key(collection, document_id))
                .map(|_| json!({}))
                .ok_or_else(|| OperationError::status(404, "document not found")),
            Operation::List { collection, .. } => {
                let found: Vec<Value> = documents
                    .iter()
                    .filter(|((c, _), _)| c == collection)
                    .map(|(_, doc)| doc.clone())
                    .collect();
                Ok(json!({"total": found.len(), "documents": found}))
            }
        }
    }

    async fn probe(&self, _session: &usize) -> Result<(), OperationError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> PoolResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PoolConfiguration::new().with_capacity(4);
    let pool = ConnectionPool::connect(MemoryStore::new(5), config).await?;
    let executor = RetryExecutor::new(
        pool.clone(),
        RetryPolicy::new().with_base_backoff(Duration::from_millis(50)),
    )?;

    let mut tasks = Vec::new();
    for n in 0..8 {
        tasks.push(executor.execute_async(Operation::Create {
            collection: "conversations".into(),
            document_id: format!("msg-{n}"),
            data: json!({"user_id": "42", "message": format!("hello {n}")}),
        }));
    }
    for task in tasks {
        join_execution(task).await?;
    }

    let history = executor
        .execute(Operation::List {
            collection: "conversations".into(),
            queries: vec!["user_id=42".into(), "limit(5)".into()],
        })
        .await?;
    info!(total = %history["total"], "listed conversation history");

    match executor
        .execute(Operation::Read {
            collection: "conversations".into(),
            document_id: "missing".into(),
        })
        .await
    {
        Ok(_) => info!("unexpectedly found document"),
        Err(err) => info!(error = %err, "lookup of missing document failed as expected"),
    }

    let auditor = HealthAuditor::new(pool.clone());
    let sweeper = MaintenanceSweeper::new(pool.clone());
    info!(healthy = auditor.health_check().await, "health check");
    info!(recycled = sweeper.sweep().await, "maintenance sweep");

    let stats = pool.stats();
    info!(
        total = stats.total,
        busy = stats.busy,
        idle = stats.idle,
        error_flagged = stats.error_flagged,
        mean_age = ?stats.mean_age,
        "pool stats"
    );
    #[cfg(feature = "metrics")]
    println!(
        "{}",
        docpool::MetricsExporter::export_prometheus(&stats, &pool.metrics(), "documents")
    );

    Ok(())
}
