pub mod adapter;
pub mod bridge;
pub mod config;
pub mod conflict;
pub mod datastore;
pub mod document;
pub mod error;
pub mod manager;
pub mod validation;

pub use adapter::{Callback, CallAdapter, Pending};
pub use bridge::{BoundaryCall, CallId, Engine, Operation, Reply, ReplySink, SERVICE_NAME};
pub use config::{ClientConfig, Platform};
pub use conflict::{
    from_fn, ConflictCoordinator, ConflictResolver, KeepCurrent, PickRevision, PickWinner, Resolution,
    ResolverFailurePolicy,
};
pub use datastore::Datastore;
pub use document::{AttachmentRef, DocumentRevision, Index, Query};
pub use error::{EngineError, ResolverError, SyncError, SyncResult, ValidationError};
pub use manager::{DatastoreManager, ManagerId, ManagerOptions, SyncClient};
