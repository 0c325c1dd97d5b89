//! # Remote Service Collaborator
//!
//! The engine never talks to the tabular data service directly. It drives an
//! injected [`RemoteService`] that can execute one record operation and run
//! one alternate-key lookup. Connection setup and authentication live behind
//! that trait and are out of this crate's hands.
//!
//! When the caller does not inject a connection, the engine builder asks a
//! [`ConnectionResolver`] once, at construction time. There is no ambient,
//! process-wide connection state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BulkResult, RemoteError};
use crate::models::{FieldValue, RecordId};
use indexmap::IndexMap;

/// Kinds of custom business logic that can be bypassed for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BusinessLogicKind {
    /// Synchronous plug-ins and real-time workflows
    CustomSync,
    /// Asynchronous plug-ins and background workflows
    CustomAsync,
}

impl fmt::Display for BusinessLogicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusinessLogicKind::CustomSync => write!(f, "CustomSync"),
            BusinessLogicKind::CustomAsync => write!(f, "CustomAsync"),
        }
    }
}

/// Per-write options forwarded untouched to the remote service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOptions {
    #[serde(default)]
    pub bypass_business_logic_execution: BTreeSet<BusinessLogicKind>,
    #[serde(default)]
    pub bypass_business_logic_execution_step_ids: BTreeSet<Uuid>,
}

impl OperationOptions {
    pub fn is_bypassing(&self) -> bool {
        !self.bypass_business_logic_execution.is_empty()
            || !self.bypass_business_logic_execution_step_ids.is_empty()
    }
}

/// One write against the remote service
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOperation {
    Create {
        table: String,
        fields: IndexMap<String, FieldValue>,
        options: OperationOptions,
    },
    Update {
        table: String,
        id: RecordId,
        fields: IndexMap<String, FieldValue>,
        options: OperationOptions,
    },
    Delete {
        table: String,
        id: RecordId,
        options: OperationOptions,
    },
}

impl RemoteOperation {
    pub fn table(&self) -> &str {
        match self {
            RemoteOperation::Create { table, .. }
            | RemoteOperation::Update { table, .. }
            | RemoteOperation::Delete { table, .. } => table,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            RemoteOperation::Create { .. } => "create",
            RemoteOperation::Update { .. } => "update",
            RemoteOperation::Delete { .. } => "delete",
        }
    }
}

/// Alternate-key lookup: find rows of `table` whose `keys` columns equal the given values
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
    pub table: String,
    pub keys: Vec<(String, FieldValue)>,
}

/// Remote tabular data service as seen by the engine
///
/// Implementations must be safe to share across workers; the engine calls
/// them concurrently and never mutates them.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Execute one write, returning the identity of the affected row
    async fn execute(&self, operation: &RemoteOperation) -> Result<RecordId, RemoteError>;

    /// Return the identities of every row matching the query (zero, one or many)
    async fn lookup(&self, query: &LookupQuery) -> Result<Vec<RecordId>, RemoteError>;
}

/// Source of a default connection when none is injected explicitly
pub trait ConnectionResolver: Send + Sync {
    fn default_connection(&self) -> BulkResult<Arc<dyn RemoteService>>;
}

/// Resolver that always hands out the same connection
pub struct StaticConnectionResolver {
    connection: Arc<dyn RemoteService>,
}

impl StaticConnectionResolver {
    pub fn new(connection: Arc<dyn RemoteService>) -> Self {
        Self { connection }
    }
}

impl ConnectionResolver for StaticConnectionResolver {
    fn default_connection(&self) -> BulkResult<Arc<dyn RemoteService>> {
        Ok(Arc::clone(&self.connection))
    }
}
