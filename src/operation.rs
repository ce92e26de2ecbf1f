//! Document operations and the store interface the pool drives

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::OperationError;

/// Kind tag of an [`Operation`], used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl OperationKind {
    /// Lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single document-store request with its typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        collection: String,
        document_id: String,
        data: Value,
    },
    Read {
        collection: String,
        document_id: String,
    },
    Update {
        collection: String,
        document_id: String,
        data: Value,
    },
    Delete {
        collection: String,
        document_id: String,
    },
    List {
        collection: String,
        queries: Vec<String>,
    },
}

impl Operation {
    /// Which kind of operation this is
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Read { .. } => OperationKind::Read,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
            Self::List { .. } => OperationKind::List,
        }
    }

    /// Collection the operation targets
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. }
            | Self::Read { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::List { collection, .. } => collection,
        }
    }

    /// Target document, for operations addressing a single one
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Create { document_id, .. }
            | Self::Read { document_id, .. }
            | Self::Update { document_id, .. }
            | Self::Delete { document_id, .. } => Some(document_id),
            Self::List { .. } => None,
        }
    }
}

/// Remote document store reached through pooled sessions.
///
/// `connect` is called once per slot when the pool is built and again on every
/// refresh. `perform` and `probe` receive the session of the handle they run on
/// and must report failures as [`OperationError`] so the executor can classify
/// them.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Client/session object held by one pool handle
    type Session: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Session, OperationError>;

    async fn perform(
        &self,
        session: &Self::Session,
        operation: &Operation,
    ) -> Result<Value, OperationError>;

    /// Minimal read used by the health auditor
    async fn probe(&self, session: &Self::Session) -> Result<(), OperationError>;
}

/// Lets callers keep their own reference to a store they hand to the pool
#[async_trait]
impl<T: DocumentStore> DocumentStore for Arc<T> {
    type Session = T::Session;

    async fn connect(&self) -> Result<Self::Session, OperationError> {
        (**self).connect().await
    }

    async fn perform(
        &self,
        session: &Self::Session,
        operation: &Operation,
    ) -> Result<Value, OperationError> {
        (**self).perform(session, operation).await
    }

    async fn probe(&self, session: &Self::Session) -> Result<(), OperationError> {
        (**self).probe(session).await
    }
}
