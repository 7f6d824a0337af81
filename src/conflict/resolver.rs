//! Conflict resolvers
//!
//! A resolver inspects the conflicting leaves of one document (current
//! winner first) and picks the revision that should become the new winner,
//! or `None` to leave the document as it is.

use serde::{Deserialize, Serialize};

use crate::document::DocumentRevision;
use crate::error::ResolverError;

pub type Resolution = Result<Option<DocumentRevision>, ResolverError>;

/// Caller-supplied resolution logic. Consumed by its single invocation.
pub trait ConflictResolver: Send + 'static {
    fn resolve(self: Box<Self>, doc_id: &str, conflicts: &[DocumentRevision]) -> Resolution;

    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> ConflictResolver for F
where
    F: FnOnce(&str, &[DocumentRevision]) -> Resolution + Send + 'static,
{
    fn resolve(self: Box<Self>, doc_id: &str, conflicts: &[DocumentRevision]) -> Resolution {
        (*self)(doc_id, conflicts)
    }
}

/// Lets closures be written without annotating their argument types.
pub fn from_fn<F>(f: F) -> F
where
    F: FnOnce(&str, &[DocumentRevision]) -> Resolution + Send + 'static,
{
    f
}

/// Leaves the revision tree untouched.
pub struct KeepCurrent;

impl ConflictResolver for KeepCurrent {
    fn resolve(self: Box<Self>, _doc_id: &str, _conflicts: &[DocumentRevision]) -> Resolution {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "keep_current"
    }
}

/// Confirms the engine's current winner, discarding the other leaves.
pub struct PickWinner;

impl ConflictResolver for PickWinner {
    fn resolve(self: Box<Self>, _doc_id: &str, conflicts: &[DocumentRevision]) -> Resolution {
        Ok(conflicts.first().cloned())
    }

    fn name(&self) -> &'static str {
        "pick_winner"
    }
}

/// Promotes the leaf with the given revision id.
pub struct PickRevision(pub String);

impl ConflictResolver for PickRevision {
    fn resolve(self: Box<Self>, doc_id: &str, conflicts: &[DocumentRevision]) -> Resolution {
        conflicts
            .iter()
            .find(|rev| rev.rev() == Some(self.0.as_str()))
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                ResolverError::new(format!(
                    "revision '{}' is not a conflict of document '{}'",
                    self.0, doc_id
                ))
            })
    }

    fn name(&self) -> &'static str {
        "pick_revision"
    }
}

/// What to do when resolution logic fails (returns an error, panics, or
/// returns a revision that does not validate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverFailurePolicy {
    /// Submit "no change" so the engine releases its pending session, then
    /// fail the caller once the engine confirms.
    #[default]
    SubmitUnchanged,
    /// Send nothing back and fail the caller immediately. The engine-side
    /// session is left pending.
    Abandon,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn leaf(rev: &str, value: Value) -> DocumentRevision {
        let body: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
        DocumentRevision::with_id_and_rev("doc1", rev, body)
    }

    fn conflicts() -> Vec<DocumentRevision> {
        vec![leaf("2-b", json!({"v": 2})), leaf("2-a", json!({"v": 1}))]
    }

    #[test]
    fn test_keep_current() {
        let resolver: Box<dyn ConflictResolver> = Box::new(KeepCurrent);
        assert_eq!(resolver.name(), "keep_current");
        assert_eq!(resolver.resolve("doc1", &conflicts()), Ok(None));
    }

    #[test]
    fn test_pick_winner() {
        let resolver: Box<dyn ConflictResolver> = Box::new(PickWinner);
        let chosen = resolver.resolve("doc1", &conflicts()).unwrap().unwrap();
        assert_eq!(chosen.rev(), Some("2-b"));
    }

    #[test]
    fn test_pick_revision() {
        let resolver: Box<dyn ConflictResolver> = Box::new(PickRevision("2-a".to_string()));
        let chosen = resolver.resolve("doc1", &conflicts()).unwrap().unwrap();
        assert_eq!(chosen.get("v"), Some(&json!(1)));

        let resolver: Box<dyn ConflictResolver> = Box::new(PickRevision("9-z".to_string()));
        let err = resolver.resolve("doc1", &conflicts()).unwrap_err();
        assert!(err.to_string().contains("9-z"));
    }

    #[test]
    fn test_closure_resolver() {
        let resolver: Box<dyn ConflictResolver> = Box::new(from_fn(|doc_id, conflicts| {
            assert_eq!(doc_id, "doc1");
            Ok(conflicts.last().cloned())
        }));
        assert_eq!(resolver.name(), "custom");
        let chosen = resolver.resolve("doc1", &conflicts()).unwrap().unwrap();
        assert_eq!(chosen.rev(), Some("2-a"));
    }

    #[test]
    fn test_policy_serde() {
        assert_eq!(
            serde_json::to_value(ResolverFailurePolicy::SubmitUnchanged).unwrap(),
            json!("submit_unchanged")
        );
        let policy: ResolverFailurePolicy = serde_json::from_value(json!("abandon")).unwrap();
        assert_eq!(policy, ResolverFailurePolicy::Abandon);
    }
}
