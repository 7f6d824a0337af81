use serde_json::Value;
use thiserror::Error;

/// Malformed caller input, raised synchronously before any boundary call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must exist")]
    Missing(&'static str),

    #[error("{0} must be a String")]
    NotAString(&'static str),

    #[error("{0} must be an Object")]
    NotAnObject(&'static str),

    #[error("'_id' is required if '_rev' is specified.")]
    RevisionWithoutId,

    #[error("documentRevision contained invalid attachments.  _attachments had no body")]
    EmptyAttachments,

    #[error("documentRevision contained invalid attachment.  {0} had no body")]
    AttachmentWithoutBody(String),

    #[error("documentRevision contained invalid attachment.  {0} had no data")]
    AttachmentWithoutData(String),

    #[error("documentRevision contained invalid attachment.  {0} had no content_type")]
    AttachmentWithoutContentType(String),

    #[error("documentRevision must have '_id' and '_rev' fields")]
    UpdateWithoutIdAndRev,

    #[error("A _id and _rev is required to delete.")]
    DeleteWithoutIdAndRev,

    #[error("documentRevision is malformed: {0}")]
    MalformedRevision(String),

    #[error("A selector is required to query")]
    MissingSelector,

    #[error("Datastore '{0}' is closed")]
    DatastoreClosed(String),
}

/// Failure reported by (or while talking to) the storage engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Engine error: {0}")]
    Reported(Value),

    #[error("Malformed engine reply: {0}")]
    MalformedReply(String),

    #[error("Engine released the call without replying")]
    Dropped,
}

impl EngineError {
    /// The engine's own message, when it sent a string or an object with a
    /// `message`/`error` field.
    pub fn message(&self) -> Option<&str> {
        match self {
            EngineError::Reported(Value::String(msg)) => Some(msg),
            EngineError::Reported(Value::Object(obj)) => obj
                .get("message")
                .or_else(|| obj.get("error"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Caller-supplied conflict resolution logic failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Conflict resolver failed: {0}")]
pub struct ResolverError(pub String);

impl ResolverError {
    pub fn new(msg: impl Into<String>) -> Self {
        ResolverError(msg.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            SyncError::Engine(err) => Some(err),
            _ => None,
        }
    }
}
