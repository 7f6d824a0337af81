//! Conflict resolution
//!
//! Resolving a conflicted document is a two-message exchange on one engine
//! channel: the engine first reports the conflicting leaves together with
//! a resolver token, the caller's resolver picks a winner, the choice is
//! submitted with that token, and the engine's second message completes the
//! caller's future.

pub mod coordinator;
pub mod resolver;
pub mod session;

pub use coordinator::ConflictCoordinator;
pub use resolver::{
    from_fn, ConflictResolver, KeepCurrent, PickRevision, PickWinner, Resolution,
    ResolverFailurePolicy,
};
pub use session::{ConflictNotice, ProtocolViolation, ResolverToken, SessionState};
