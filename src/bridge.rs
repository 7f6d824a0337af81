//! Engine boundary
//!
//! Every operation reaches the native storage engine as a [`BoundaryCall`]:
//! the service name, an operation name and a positional argument list. The
//! engine answers through a [`ReplySink`], which it may clone, keep and
//! invoke from any thread. One-shot operations expect a single reply;
//! `resolveConflictsForDocument` receives two on the same sink.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "CloudantSync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    CreateDatastoreManager,
    OpenDatastore,
    DeleteDatastore,
    CloseDatastore,
    CreateOrUpdateDocumentFromRevision,
    GetDocument,
    DeleteDocumentFromRevision,
    EnsureIndexed,
    DeleteIndexNamed,
    Find,
    GetConflictedDocumentIds,
    ResolveConflictsForDocument,
    ReturnResolvedDocument,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateDatastoreManager => "createDatastoreManager",
            Operation::OpenDatastore => "openDatastore",
            Operation::DeleteDatastore => "deleteDatastore",
            Operation::CloseDatastore => "closeDatastore",
            Operation::CreateOrUpdateDocumentFromRevision => "createOrUpdateDocumentFromRevision",
            Operation::GetDocument => "getDocument",
            Operation::DeleteDocumentFromRevision => "deleteDocumentFromRevision",
            Operation::EnsureIndexed => "ensureIndexed",
            Operation::DeleteIndexNamed => "deleteIndexNamed",
            Operation::Find => "find",
            Operation::GetConflictedDocumentIds => "getConflictedDocumentIds",
            Operation::ResolveConflictsForDocument => "resolveConflictsForDocument",
            Operation::ReturnResolvedDocument => "returnResolvedDocument",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one logical call issued by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic call id generator, owned by the client context.
#[derive(Debug, Default)]
pub struct CallIds {
    next: AtomicU64,
}

impl CallIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> CallId {
        CallId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCall {
    pub id: CallId,
    pub service: &'static str,
    pub operation: Operation,
    pub args: Vec<Value>,
}

impl BoundaryCall {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

/// One message from the engine: a success payload or an opaque error.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(Value),
    Error(Value),
}

impl Reply {
    pub fn into_result(self) -> Result<Value, crate::error::EngineError> {
        match self {
            Reply::Success(value) => Ok(value),
            Reply::Error(payload) => Err(crate::error::EngineError::Reported(payload)),
        }
    }
}

/// Success/error handler pair handed to the engine with each call.
#[derive(Clone)]
pub struct ReplySink {
    handler: Arc<dyn Fn(Reply) + Send + Sync>,
}

impl ReplySink {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Reply) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn send(&self, reply: Reply) {
        (self.handler)(reply)
    }

    pub fn success(&self, payload: Value) {
        self.send(Reply::Success(payload))
    }

    pub fn error(&self, payload: Value) {
        self.send(Reply::Error(payload))
    }
}

impl fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySink").finish_non_exhaustive()
    }
}

/// The native storage engine, seen from the client side.
///
/// `exec` must not block waiting for its own reply: answers are delivered
/// through `reply`, either before `exec` returns or later from another
/// thread.
pub trait Engine: Send + Sync {
    fn exec(&self, call: BoundaryCall, reply: ReplySink);
}
