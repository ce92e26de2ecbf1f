//! # docpool
//!
//! Bounded, self-healing pool of document-store connections.
//!
//! ## Features
//!
//! - Fixed set of reusable handles with stable ids
//! - Automatic release via RAII (Drop), including cancelled futures
//! - Bounded waiting under contention with `PoolExhausted` on timeout
//! - Refresh of idle-expired and error-prone connections
//! - Retry executor with error classification and exponential backoff
//! - Debounced health auditing with an aggregate health ratio
//! - Maintenance sweeps of old or failing connections
//! - Prometheus metrics export
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use docpool::{
//!     ConnectionPool, DocumentStore, Operation, OperationError, PoolConfiguration,
//!     RetryExecutor, RetryPolicy,
//! };
//! use serde_json::{Value, json};
//!
//! struct Store;
//!
//! #[async_trait]
//! impl DocumentStore for Store {
//!     type Session = ();
//!
//!     async fn connect(&self) -> Result<(), OperationError> {
//!         Ok(())
//!     }
//!
//!     async fn perform(&self, _: &(), _: &Operation) -> Result<Value, OperationError> {
//!         Ok(json!({"documents": []}))
//!     }
//!
//!     async fn probe(&self, _: &()) -> Result<(), OperationError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> docpool::PoolResult<()> {
//! let pool = ConnectionPool::connect(Store, PoolConfiguration::default()).await?;
//! let executor = RetryExecutor::new(pool, RetryPolicy::default())?;
//!
//! let history = executor
//!     .execute(Operation::List {
//!         collection: "conversations".into(),
//!         queries: vec!["limit(5)".into()],
//!     })
//!     .await?;
//! println!("{history}");
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod handle;
mod health;
mod metrics;
mod operation;
mod pool;
mod retry;
mod sweeper;

#[cfg(test)]
mod testing;

pub use config::{PoolConfiguration, RetryPolicy};
pub use errors::{ErrorClass, OperationError, PoolError, PoolResult};
pub use handle::{HandleId, HandleSnapshot};
pub use health::{HealthAuditor, HealthReport};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use operation::{DocumentStore, Operation, OperationKind};
pub use pool::{ConnectionPool, PoolStats, PooledHandle};
pub use retry::{RetryExecutor, join_execution};
pub use sweeper::MaintenanceSweeper;
