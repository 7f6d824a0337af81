//! Async call adapter
//!
//! Wraps each boundary call in a [`Pending`] future and an optional legacy
//! completion callback. Both are fed by a single [`Completion`], which
//! fires at most once: the future's channel first, then the callback, with
//! the same outcome. There is no cancel operation; once issued, a call runs
//! until the engine answers.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::bridge::{BoundaryCall, CallId, CallIds, Engine, Operation, Reply, ReplySink, SERVICE_NAME};
use crate::error::{EngineError, SyncError, SyncResult};

/// Legacy completion function, called once with the call's outcome.
pub type Callback<T> = Box<dyn FnOnce(SyncResult<T>) + Send + 'static>;

/// Single-delivery event shared by a [`Pending`] future and a [`Callback`].
///
/// Dropping an unfired completion delivers [`EngineError::Dropped`], so a
/// caller is never left waiting on a reply handle nobody holds.
pub struct Completion<T: Clone + Send + 'static> {
    slot: Option<(oneshot::Sender<SyncResult<T>>, Option<Callback<T>>)>,
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub fn new(callback: Option<Callback<T>>) -> (Self, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Some((tx, callback)),
            },
            Pending { rx },
        )
    }

    pub fn complete(mut self, outcome: SyncResult<T>) {
        self.fire(outcome);
    }

    fn fire(&mut self, outcome: SyncResult<T>) {
        if let Some((tx, callback)) = self.slot.take() {
            match callback {
                Some(callback) => {
                    // The receiver may already be gone; the callback still hears about it
                    let _ = tx.send(outcome.clone());
                    callback(outcome);
                }
                None => {
                    let _ = tx.send(outcome);
                }
            }
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            self.fire(Err(EngineError::Dropped.into()));
        }
    }
}

/// Future side of a boundary call.
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<SyncResult<T>>,
}

impl<T: Clone + Send + 'static> Pending<T> {
    /// A future that is already resolved, still notifying `callback`.
    pub fn ready(outcome: SyncResult<T>, callback: Option<Callback<T>>) -> Self {
        let (completion, pending) = Completion::new(callback);
        completion.complete(outcome);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = SyncResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(EngineError::Dropped.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Issues boundary calls against one engine.
#[derive(Clone)]
pub struct CallAdapter {
    engine: Arc<dyn Engine>,
    ids: Arc<CallIds>,
}

impl CallAdapter {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            ids: Arc::new(CallIds::new()),
        }
    }

    pub fn ids(&self) -> &CallIds {
        &self.ids
    }

    pub(crate) fn next_call_id(&self) -> CallId {
        self.ids.next()
    }

    /// Sends one call with a caller-built reply sink. Used directly by the
    /// conflict coordinator, whose channel carries more than one message.
    pub(crate) fn dispatch_as(&self, id: CallId, operation: Operation, args: Vec<Value>, reply: ReplySink) {
        debug!("Boundary call {} {}/{} ({} args)", id, SERVICE_NAME, operation, args.len());
        self.engine.exec(
            BoundaryCall {
                id,
                service: SERVICE_NAME,
                operation,
                args,
            },
            reply,
        );
    }

    pub(crate) fn dispatch(&self, operation: Operation, args: Vec<Value>, reply: ReplySink) -> CallId {
        let id = self.next_call_id();
        self.dispatch_as(id, operation, args, reply);
        id
    }

    /// One-shot request/response call. `on_reply` maps the engine's first
    /// message into the outcome; later messages on the same sink are dropped.
    pub fn call<T, F>(
        &self,
        operation: Operation,
        args: Vec<Value>,
        on_reply: F,
        callback: Option<Callback<T>>,
    ) -> Pending<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Reply) -> SyncResult<T> + Send + 'static,
    {
        let (completion, pending) = Completion::new(callback);
        let slot = Arc::new(Mutex::new(Some((completion, on_reply))));
        let id = self.next_call_id();

        let sink = ReplySink::new(move |reply| {
            // Take under the lock, complete outside it: callbacks may re-enter
            let taken = slot.lock().take();
            match taken {
                Some((completion, on_reply)) => completion.complete(on_reply(reply)),
                None => trace!("Dropping extra reply for {} call {}", operation, id),
            }
        });

        self.dispatch_as(id, operation, args, sink);
        pending
    }
}

/// Decodes a success payload into `T`.
pub(crate) fn decoded<T: DeserializeOwned>(reply: Reply) -> SyncResult<T> {
    let value = reply.into_result()?;
    serde_json::from_value(value)
        .map_err(|e| SyncError::Engine(EngineError::MalformedReply(e.to_string())))
}

/// Success payload ignored.
pub(crate) fn unit(reply: Reply) -> SyncResult<()> {
    reply.into_result()?;
    Ok(())
}
