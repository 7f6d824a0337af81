//! Datastore handle
//!
//! Every operation validates its input first. Validation failures are
//! returned synchronously as `Err(ValidationError)` and nothing reaches the
//! engine; otherwise exactly one boundary call is issued and its
//! [`Pending`] future returned. Operations on one handle are not
//! serialized: chain on the returned futures where ordering matters.

use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::{decoded, unit, Callback, Pending};
use crate::bridge::{Operation, Reply};
use crate::conflict::ConflictResolver;
use crate::document::{DocumentRevision, Index};
use crate::error::{EngineError, SyncError, SyncResult, ValidationError};
use crate::manager::ClientContext;
use crate::validation;

/// Lightweight handle to one named datastore. Clones share the closed flag.
#[derive(Clone)]
pub struct Datastore {
    name: Arc<str>,
    context: Arc<ClientContext>,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type OpResult<T> = Result<Pending<T>, ValidationError>;

impl Datastore {
    pub(crate) fn new(name: impl Into<Arc<str>>, context: Arc<ClientContext>) -> Self {
        Self {
            name: name.into(),
            context,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ValidationError> {
        if self.is_closed() {
            return Err(ValidationError::DatastoreClosed(self.name.to_string()));
        }
        Ok(())
    }

    fn name_arg(&self) -> Value {
        json!(&*self.name)
    }

    /// Closes the datastore. Once this resolves successfully, the handle
    /// and all its clones refuse further operations.
    ///
    /// With `close_always_succeeds` configured, an error reported by the
    /// engine is logged and the close still succeeds.
    pub fn close(&self, callback: Option<Callback<()>>) -> OpResult<()> {
        self.ensure_open()?;

        let name = self.name.clone();
        let closed = self.closed.clone();
        let lenient = self.context.config.close_always_succeeds();

        Ok(self.context.adapter.call(
            Operation::CloseDatastore,
            vec![self.name_arg()],
            move |reply| {
                let outcome = match unit(reply) {
                    Err(SyncError::Engine(EngineError::Reported(err))) if lenient => {
                        warn!("Ignoring close error for datastore '{}': {}", name, err);
                        Ok(())
                    }
                    other => other,
                };
                if outcome.is_ok() {
                    closed.store(true, Ordering::Release);
                    info!("Datastore '{}' closed", name);
                }
                outcome
            },
            callback,
        ))
    }

    /// Saves a new document. `id` may be absent, in which case the engine
    /// assigns one; the saved revision carries the assigned id and rev.
    pub fn create(
        &self,
        revision: &DocumentRevision,
        callback: Option<Callback<DocumentRevision>>,
    ) -> OpResult<DocumentRevision> {
        self.ensure_open()?;
        validation::validate_name(&self.name)?;
        validation::validate_document_revision(revision)?;
        Ok(self.create_or_update(revision, true, callback))
    }

    /// Saves a new revision of an existing document. A stale `rev` is
    /// reported by the engine as a conflict through the future.
    pub fn update(
        &self,
        revision: &DocumentRevision,
        callback: Option<Callback<DocumentRevision>>,
    ) -> OpResult<DocumentRevision> {
        self.ensure_open()?;
        validation::validate_name(&self.name)?;
        validation::validate_update(revision)?;
        Ok(self.create_or_update(revision, false, callback))
    }

    fn create_or_update(
        &self,
        revision: &DocumentRevision,
        is_create: bool,
        callback: Option<Callback<DocumentRevision>>,
    ) -> Pending<DocumentRevision> {
        self.context.adapter.call(
            Operation::CreateOrUpdateDocumentFromRevision,
            vec![self.name_arg(), revision.to_value(), json!(is_create)],
            revision_reply,
            callback,
        )
    }

    /// Current winning revision, or a tombstone if the document was deleted.
    pub fn get(&self, document_id: &str, callback: Option<Callback<DocumentRevision>>) -> OpResult<DocumentRevision> {
        self.ensure_open()?;
        validation::validate_document_id(document_id)?;
        Ok(self.context.adapter.call(
            Operation::GetDocument,
            vec![self.name_arg(), json!(document_id)],
            revision_reply,
            callback,
        ))
    }

    /// Deletes one leaf revision and resolves with the new tombstone.
    /// Deleting an already deleted revision is a successful no-op.
    pub fn delete_revision(
        &self,
        revision: &DocumentRevision,
        callback: Option<Callback<DocumentRevision>>,
    ) -> OpResult<DocumentRevision> {
        self.ensure_open()?;
        validation::validate_delete(revision)?;
        Ok(self.context.adapter.call(
            Operation::DeleteDocumentFromRevision,
            vec![self.name_arg(), revision.to_value()],
            revision_reply,
            callback,
        ))
    }

    /// Creates (or re-ensures) an index over `fields`, resolving with its name.
    pub fn ensure_indexed<S: AsRef<str>>(
        &self,
        fields: &[S],
        index_name: &str,
        callback: Option<Callback<String>>,
    ) -> OpResult<String> {
        self.ensure_open()?;
        validation::validate_index_name(index_name)?;
        validation::validate_field_list(fields)?;

        let fields: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
        Ok(self.context.adapter.call(
            Operation::EnsureIndexed,
            vec![self.name_arg(), json!(index_name), json!(fields)],
            decoded::<String>,
            callback,
        ))
    }

    pub fn ensure_index(&self, index: &Index, callback: Option<Callback<String>>) -> OpResult<String> {
        self.ensure_indexed(index.fields.as_slice(), &index.name, callback)
    }

    /// Resolves with the engine's deletion status.
    pub fn delete_index_named(&self, index_name: &str, callback: Option<Callback<bool>>) -> OpResult<bool> {
        self.ensure_open()?;
        validation::validate_index_name(index_name)?;
        Ok(self.context.adapter.call(
            Operation::DeleteIndexNamed,
            vec![self.name_arg(), json!(index_name)],
            decoded::<bool>,
            callback,
        ))
    }

    /// Runs a query. Accepts a [`Query`](crate::document::Query) or a raw
    /// JSON object with a `selector`.
    pub fn find(
        &self,
        query: impl Into<Value>,
        callback: Option<Callback<Vec<DocumentRevision>>>,
    ) -> OpResult<Vec<DocumentRevision>> {
        self.ensure_open()?;
        let query = query.into();
        validation::validate_query(&query)?;
        Ok(self.context.adapter.call(
            Operation::Find,
            vec![self.name_arg(), query],
            revisions_reply,
            callback,
        ))
    }

    pub fn get_conflicted_document_ids(&self, callback: Option<Callback<Vec<String>>>) -> OpResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.context.adapter.call(
            Operation::GetConflictedDocumentIds,
            vec![self.name_arg()],
            decoded::<Vec<String>>,
            callback,
        ))
    }

    /// Resolves the conflicts of one document.
    ///
    /// `resolver` runs once, when the engine reports the conflicting leaves
    /// (winner first). Its choice is sent back to the engine, and the
    /// returned future resolves with the engine's final answer.
    pub fn resolve_conflicts_for_document(
        &self,
        document_id: &str,
        resolver: impl ConflictResolver,
        callback: Option<Callback<Value>>,
    ) -> OpResult<Value> {
        self.ensure_open()?;
        validation::validate_document_id(document_id)?;
        Ok(self
            .context
            .coordinator
            .begin(&self.name, document_id, Box::new(resolver), callback))
    }
}

fn malformed(what: &str, err: impl fmt::Display) -> SyncError {
    SyncError::Engine(EngineError::MalformedReply(format!("{}: {}", what, err)))
}

fn revision_reply(reply: Reply) -> SyncResult<DocumentRevision> {
    let value = reply.into_result()?;
    DocumentRevision::from_engine(value).map_err(|e| malformed("document revision", e))
}

fn revisions_reply(reply: Reply) -> SyncResult<Vec<DocumentRevision>> {
    let value = reply.into_result()?;
    let Value::Array(items) = value else {
        return Err(malformed("query result", "expected an array"));
    };
    items
        .into_iter()
        .map(|item| DocumentRevision::from_engine(item).map_err(|e| malformed("query result", e)))
        .collect()
}
