//! Per-document conflict resolution session
//!
//! One session per `resolveConflictsForDocument` call:
//!
//! ```text
//! AwaitingConflicts --msg 1--> Resolving --submit--> Submitting --msg 2--> Done
//! ```
//!
//! The first message carries the conflicts and the engine's resolver token;
//! the second is the final result for the caller. Transitions here are pure
//! bookkeeping; the coordinator runs the resolver and talks to the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::adapter::Completion;
use crate::bridge::{CallId, Reply};
use crate::conflict::resolver::ConflictResolver;
use crate::document::DocumentRevision;
use crate::error::{EngineError, SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConflicts,
    Resolving,
    Submitting,
    Done,
}

/// Opaque, single-use correlation value issued by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolverToken(Value);

impl ResolverToken {
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// First message on a conflict channel.
///
/// The resolver token is read before anything else. Once the engine has
/// issued a token it waits for it to come back, so a notice whose
/// remaining content cannot be decoded still yields the token, with the
/// decoding failure in `contents`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictNotice {
    pub token: ResolverToken,
    pub contents: Result<(String, Vec<DocumentRevision>), EngineError>,
}

#[derive(Deserialize)]
struct NoticeContents {
    #[serde(rename = "docId")]
    doc_id: String,
    conflicts: Vec<Value>,
}

impl ConflictNotice {
    /// Parses the engine payload. Fails only when there is no token to
    /// hand back.
    pub fn parse(value: Value) -> Result<Self, EngineError> {
        let token = ["resolverId", "resolverToken"]
            .iter()
            .filter_map(|key| value.get(*key))
            .find(|token| !token.is_null())
            .cloned()
            .ok_or_else(|| {
                EngineError::MalformedReply("conflict notice without resolver token".to_string())
            })?;
        Ok(Self {
            token: ResolverToken(token),
            contents: Self::contents(value),
        })
    }

    /// Conflicting leaves, winner first, as stored by the engine.
    fn contents(value: Value) -> Result<(String, Vec<DocumentRevision>), EngineError> {
        let notice: NoticeContents = serde_json::from_value(value)
            .map_err(|e| EngineError::MalformedReply(format!("conflict notice: {}", e)))?;
        let conflicts = notice
            .conflicts
            .into_iter()
            .map(DocumentRevision::from_engine)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::MalformedReply(format!("conflicting revision: {}", e)))?;
        Ok((notice.doc_id, conflicts))
    }
}

/// A message that no live session can accept. Logged, never delivered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    #[error("reply for conflict session {0} which is no longer open: {1:?}")]
    SessionClosed(CallId, Reply),

    #[error("second early reply for conflict session {0} while its resolver was running: {1:?}")]
    UnexpectedWhileResolving(CallId, Reply),
}

/// What the coordinator must do after feeding a message to a session.
pub(crate) enum Step {
    Resolve {
        doc_id: String,
        conflicts: Vec<DocumentRevision>,
        token: ResolverToken,
        resolver: Box<dyn ConflictResolver>,
    },
    /// The notice carried a token but nothing usable to resolve.
    Reject {
        token: ResolverToken,
        error: EngineError,
    },
    Finish {
        completion: Completion<Value>,
        outcome: SyncResult<Value>,
    },
    Deferred,
    Idle,
    Violation(ProtocolViolation),
}

pub(crate) struct ConflictSession {
    id: CallId,
    doc_id: String,
    state: SessionState,
    resolver: Option<Box<dyn ConflictResolver>>,
    completion: Option<Completion<Value>>,
    deferred: Option<Reply>,
    failure: Option<SyncError>,
}

impl ConflictSession {
    pub(crate) fn new(
        id: CallId,
        doc_id: impl Into<String>,
        resolver: Box<dyn ConflictResolver>,
        completion: Completion<Value>,
    ) -> Self {
        Self {
            id,
            doc_id: doc_id.into(),
            state: SessionState::AwaitingConflicts,
            resolver: Some(resolver),
            completion: Some(completion),
            deferred: None,
            failure: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub(crate) fn on_reply(&mut self, reply: Reply) -> Step {
        match self.state {
            SessionState::AwaitingConflicts => self.on_first_reply(reply),
            SessionState::Resolving => {
                if self.deferred.is_some() {
                    return Step::Violation(ProtocolViolation::UnexpectedWhileResolving(self.id, reply));
                }
                self.deferred = Some(reply);
                Step::Deferred
            }
            SessionState::Submitting => {
                let outcome = match self.failure.take() {
                    Some(failure) => Err(failure),
                    None => reply.into_result().map_err(SyncError::from),
                };
                self.finish(outcome)
            }
            SessionState::Done => Step::Violation(ProtocolViolation::SessionClosed(self.id, reply)),
        }
    }

    fn on_first_reply(&mut self, reply: Reply) -> Step {
        let payload = match reply {
            Reply::Error(payload) => return self.finish(Err(EngineError::Reported(payload).into())),
            // Nothing to resolve: the engine answered without a conflict notice
            Reply::Success(payload) if !payload.is_object() => return self.finish(Ok(payload)),
            Reply::Success(payload) => payload,
        };

        let notice = match ConflictNotice::parse(payload) {
            Ok(notice) => notice,
            Err(err) => return self.finish(Err(err.into())),
        };
        let Some(resolver) = self.resolver.take() else {
            return self.finish(Err(EngineError::MalformedReply(
                "conflict notice for a session without resolver".to_string(),
            )
            .into()));
        };

        self.state = SessionState::Resolving;
        match notice.contents {
            Ok((doc_id, conflicts)) => Step::Resolve {
                doc_id,
                conflicts,
                token: notice.token,
                resolver,
            },
            Err(error) => Step::Reject {
                token: notice.token,
                error,
            },
        }
    }

    /// Resolver ran (or the notice was rejected) and the submission is
    /// about to be sent. `failure`, if any, becomes the caller's outcome
    /// once the engine's final message arrives. Returns a message that
    /// arrived early, to be interpreted now.
    pub(crate) fn submitted(&mut self, failure: Option<SyncError>) -> Option<Reply> {
        if self.state != SessionState::Resolving {
            return None;
        }
        self.state = SessionState::Submitting;
        self.failure = failure;
        self.deferred.take()
    }

    /// Ends the session with `err` unless it is already done.
    pub(crate) fn fail(&mut self, err: SyncError) -> Option<Step> {
        if self.is_done() {
            return None;
        }
        Some(self.finish(Err(err)))
    }

    fn finish(&mut self, outcome: SyncResult<Value>) -> Step {
        self.state = SessionState::Done;
        self.resolver = None;
        self.deferred = None;
        match self.completion.take() {
            Some(completion) => Step::Finish { completion, outcome },
            None => Step::Idle,
        }
    }
}
