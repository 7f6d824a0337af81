use parking_lot::Mutex;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use crate::adapter::{Callback, CallAdapter, Completion, Pending};
use crate::bridge::{CallId, Operation, Reply, ReplySink};
use crate::conflict::resolver::{ConflictResolver, ResolverFailurePolicy};
use crate::conflict::session::{ConflictSession, ProtocolViolation, ResolverToken, Step};
use crate::document::DocumentRevision;
use crate::error::{EngineError, ResolverError, SyncError};
use crate::validation;

/// Drives conflict resolution sessions against the engine.
///
/// Sessions live in a table keyed by the id of the call that opened them,
/// so concurrent resolutions for different documents never share state.
/// The engine's resolver token is only ever echoed back in the single
/// `returnResolvedDocument` submission.
#[derive(Clone)]
pub struct ConflictCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    adapter: CallAdapter,
    policy: ResolverFailurePolicy,
    sessions: Mutex<HashMap<CallId, ConflictSession>>,
}

/// Lives inside the conflict channel's sink; the engine releasing that
/// sink means no further message can arrive for the session.
struct ChannelGuard {
    id: CallId,
    inner: Weak<CoordinatorInner>,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_channel_closed(self.id);
        }
    }
}

impl ConflictCoordinator {
    pub fn new(adapter: CallAdapter, policy: ResolverFailurePolicy) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                adapter,
                policy,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> ResolverFailurePolicy {
        self.inner.policy
    }

    /// Number of sessions still waiting on the engine.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Opens the conflict channel for `doc_id`. The returned future
    /// resolves with the engine's final message, never with the conflict
    /// notice.
    pub fn begin(
        &self,
        datastore: &str,
        doc_id: &str,
        resolver: Box<dyn ConflictResolver>,
        callback: Option<Callback<Value>>,
    ) -> Pending<Value> {
        let inner = &self.inner;
        let id = inner.adapter.next_call_id();
        let (completion, pending) = Completion::new(callback);

        debug!(
            "Opening conflict session {} for '{}' in '{}' ({} resolver)",
            id,
            doc_id,
            datastore,
            resolver.name()
        );
        inner
            .sessions
            .lock()
            .insert(id, ConflictSession::new(id, doc_id, resolver, completion));

        let weak = Arc::downgrade(inner);
        let guard = ChannelGuard {
            id,
            inner: weak.clone(),
        };
        let sink = ReplySink::new(move |reply| {
            let _guard = &guard;
            match weak.upgrade() {
                Some(inner) => inner.on_reply(id, reply),
                None => warn!("Conflict reply for {} after client shutdown", id),
            }
        });

        inner.adapter.dispatch_as(
            id,
            Operation::ResolveConflictsForDocument,
            vec![json!(datastore), json!(doc_id)],
            sink,
        );
        pending
    }
}

impl CoordinatorInner {
    fn on_reply(self: &Arc<Self>, id: CallId, reply: Reply) {
        let mut sessions = self.sessions.lock();
        let (step, done) = match sessions.get_mut(&id) {
            Some(session) => {
                let step = session.on_reply(reply);
                (step, session.is_done())
            }
            None => (Step::Violation(ProtocolViolation::SessionClosed(id, reply)), false),
        };
        let finished = if done { sessions.remove(&id) } else { None };
        drop(sessions);
        drop(finished);
        self.run(id, step);
    }

    fn run(self: &Arc<Self>, id: CallId, step: Step) {
        match step {
            Step::Resolve {
                doc_id,
                conflicts,
                token,
                resolver,
            } => self.resolve_and_submit(id, doc_id, conflicts, token, resolver),
            Step::Reject { token, error } => {
                warn!("Conflict session {}: unusable notice, returning token unresolved: {}", id, error);
                self.submit(id, Value::Null, token, Some(error.into()));
            }
            Step::Finish { completion, outcome } => {
                match &outcome {
                    Ok(_) => info!("Conflict session {} completed", id),
                    Err(e) => warn!("Conflict session {} failed: {}", id, e),
                }
                completion.complete(outcome);
            }
            Step::Deferred => debug!("Conflict session {}: holding early reply until submission", id),
            Step::Idle => {}
            Step::Violation(violation) => warn!("Protocol violation: {}", violation),
        }
    }

    fn resolve_and_submit(
        self: &Arc<Self>,
        id: CallId,
        doc_id: String,
        conflicts: Vec<DocumentRevision>,
        token: ResolverToken,
        resolver: Box<dyn ConflictResolver>,
    ) {
        debug!("Resolving {} conflicts for '{}' (session {})", conflicts.len(), doc_id, id);

        let resolution = catch_unwind(AssertUnwindSafe(|| resolver.resolve(&doc_id, &conflicts)))
            .unwrap_or_else(|panic| Err(ResolverError::new(panic_message(panic))))
            .and_then(|chosen| match chosen {
                Some(revision) => validation::validate_document_revision(&revision)
                    .map(|_| Some(revision))
                    .map_err(|e| ResolverError::new(e.to_string())),
                None => Ok(None),
            });

        let (chosen, failure) = match resolution {
            Ok(chosen) => (chosen, None),
            Err(err) => {
                warn!("Resolver for '{}' failed: {}", doc_id, err);
                (None, Some(err))
            }
        };

        if let (Some(failure), ResolverFailurePolicy::Abandon) = (&failure, self.policy) {
            let abandoned = self.sessions.lock().remove(&id);
            if let Some(mut session) = abandoned {
                warn!("Abandoning conflict session {} for '{}'", id, session.doc_id());
                if let Some(step) = session.fail(SyncError::Resolver(failure.clone())) {
                    self.run(id, step);
                }
            }
            return;
        }

        let payload = chosen.map(|rev| rev.to_value()).unwrap_or(Value::Null);
        self.submit(id, payload, token, failure.map(SyncError::Resolver));
    }

    /// Sends the session's single `returnResolvedDocument`, then replays a
    /// final message that arrived while the resolver was running.
    fn submit(self: &Arc<Self>, id: CallId, payload: Value, token: ResolverToken, failure: Option<SyncError>) {
        let deferred = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&id) {
                Some(session) => session.submitted(failure),
                None => {
                    debug!("Conflict session {} closed while resolving; nothing to submit", id);
                    return;
                }
            }
        };

        let weak = Arc::downgrade(self);
        let submission = ReplySink::new(move |reply| match reply {
            Reply::Success(_) => trace!("Resolution for session {} accepted", id),
            Reply::Error(err) => {
                if let Some(inner) = weak.upgrade() {
                    inner.on_submission_failed(id, EngineError::Reported(err));
                }
            }
        });
        self.adapter.dispatch(
            Operation::ReturnResolvedDocument,
            vec![payload, token.into_value()],
            submission,
        );

        if let Some(reply) = deferred {
            self.on_reply(id, reply);
        }
    }

    fn on_submission_failed(self: &Arc<Self>, id: CallId, err: EngineError) {
        warn!("Submitting resolution for session {} failed: {}", id, err);
        self.fail_session(id, err.into());
    }

    fn on_channel_closed(self: &Arc<Self>, id: CallId) {
        self.fail_session(id, EngineError::Dropped.into());
    }

    fn fail_session(self: &Arc<Self>, id: CallId, err: SyncError) {
        let removed = self.sessions.lock().remove(&id);
        if let Some(mut session) = removed {
            if let Some(step) = session.fail(err) {
                self.run(id, step);
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("resolver panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("resolver panicked: {}", msg)
    } else {
        "resolver panicked".to_string()
    }
}
