//! Common test utilities for client tests
//!
//! Provides:
//! - `ScriptedEngine`: records every call and lets the test reply later,
//!   in any order and any number of times
//! - `AutoEngine`: replies synchronously from a handler, before `exec`
//!   returns, so every reply re-enters the client
//! - helpers to build a client and open a datastore against either engine

#![allow(dead_code)]

use cloudant_sync::{
    BoundaryCall, ClientConfig, Datastore, Engine, ManagerOptions, Operation, ReplySink, SyncClient,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// ScriptedEngine
// ============================================================================

#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<(BoundaryCall, Option<ReplySink>)>>,
}

impl Engine for ScriptedEngine {
    fn exec(&self, call: BoundaryCall, reply: ReplySink) {
        self.calls.lock().push((call, Some(reply)));
    }
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call(&self, index: usize) -> BoundaryCall {
        self.calls.lock()[index].0.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls.lock().iter().map(|(call, _)| call.operation).collect()
    }

    /// Index of the most recent call to `operation`.
    pub fn last(&self, operation: Operation) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .rposition(|(call, _)| call.operation == operation)
    }

    pub fn sink(&self, index: usize) -> ReplySink {
        self.calls.lock()[index]
            .1
            .clone()
            .expect("sink already released")
    }

    pub fn success(&self, index: usize, payload: Value) {
        self.sink(index).success(payload);
    }

    pub fn error(&self, index: usize, payload: Value) {
        self.sink(index).error(payload);
    }

    /// Drops the engine's copy of a sink, as an engine giving up on a call.
    pub fn release(&self, index: usize) {
        let sink = self.calls.lock()[index].1.take();
        drop(sink);
    }
}

// ============================================================================
// AutoEngine
// ============================================================================

type Handler = Box<dyn Fn(&BoundaryCall, &ReplySink) + Send + Sync>;

pub struct AutoEngine {
    calls: Mutex<Vec<BoundaryCall>>,
    handler: Handler,
}

impl Engine for AutoEngine {
    fn exec(&self, call: BoundaryCall, reply: ReplySink) {
        self.calls.lock().push(call.clone());
        (self.handler)(&call, &reply);
    }
}

impl AutoEngine {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&BoundaryCall, &ReplySink) + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    pub fn calls(&self) -> Vec<BoundaryCall> {
        self.calls.lock().clone()
    }

    pub fn count_of(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }
}

/// Answers manager/datastore lifecycle calls and stores documents in memory,
/// assigning ids and revisions the way the native engine does.
pub fn memory_engine() -> Arc<AutoEngine> {
    let docs: Mutex<HashMap<String, Value>> = Mutex::new(HashMap::new());

    AutoEngine::new(move |call, reply| match call.operation {
        Operation::CreateDatastoreManager => reply.success(json!({"id": "dsm-1"})),
        Operation::OpenDatastore => reply.success(json!({"name": call.args[1]})),
        Operation::DeleteDatastore | Operation::CloseDatastore => reply.success(Value::Null),
        Operation::CreateOrUpdateDocumentFromRevision => {
            let mut doc = call.args[1].clone();
            let is_create = call.args[2] == json!(true);
            let mut docs = docs.lock();

            if is_create {
                if doc.get("_id").is_none() {
                    doc["_id"] = json!(uuid::Uuid::new_v4().to_string());
                }
                doc["_rev"] = json!(format!("1-{}", uuid::Uuid::new_v4().simple()));
            } else {
                let id = doc["_id"].as_str().unwrap_or_default().to_string();
                let current = docs.get(&id).and_then(|d| d["_rev"].as_str()).map(str::to_string);
                if current.as_deref() != doc["_rev"].as_str() {
                    drop(docs);
                    reply.error(json!({"error": "conflict", "message": "Document update conflict"}));
                    return;
                }
                let generation = current
                    .and_then(|rev| rev.split('-').next().and_then(|g| g.parse::<u64>().ok()))
                    .unwrap_or(0);
                doc["_rev"] = json!(format!("{}-{}", generation + 1, uuid::Uuid::new_v4().simple()));
            }

            let id = doc["_id"].as_str().unwrap_or_default().to_string();
            docs.insert(id, doc.clone());
            drop(docs);
            reply.success(doc);
        }
        Operation::GetDocument => {
            let found = docs.lock().get(call.args[1].as_str().unwrap_or_default()).cloned();
            match found {
                Some(doc) => reply.success(doc),
                None => reply.error(json!({"error": "not_found"})),
            }
        }
        Operation::DeleteDocumentFromRevision => {
            let id = call.args[1]["_id"].as_str().unwrap_or_default().to_string();
            let rev = call.args[1]["_rev"].as_str().unwrap_or_default().to_string();
            let mut docs = docs.lock();
            let existing = docs
                .get(&id)
                .filter(|doc| doc["_deleted"] == json!(true))
                .cloned();
            let tombstone = match existing {
                Some(doc) => doc,
                None => {
                    let generation = rev
                        .split('-')
                        .next()
                        .and_then(|g| g.parse::<u64>().ok())
                        .unwrap_or(0);
                    let tombstone = json!({
                        "_id": id,
                        "_rev": format!("{}-{}", generation + 1, uuid::Uuid::new_v4().simple()),
                        "_deleted": true
                    });
                    docs.insert(id, tombstone.clone());
                    tombstone
                }
            };
            drop(docs);
            reply.success(tombstone);
        }
        Operation::EnsureIndexed => reply.success(call.args[1].clone()),
        Operation::DeleteIndexNamed => reply.success(json!(true)),
        Operation::Find => {
            let selector = call.args[1]["selector"].as_object().cloned().unwrap_or_default();
            let matches: Vec<Value> = docs
                .lock()
                .values()
                .filter(|doc| selector.iter().all(|(k, v)| doc.get(k) == Some(v)))
                .cloned()
                .collect();
            reply.success(Value::Array(matches));
        }
        Operation::GetConflictedDocumentIds => reply.success(json!([])),
        Operation::ResolveConflictsForDocument => reply.success(Value::Null),
        Operation::ReturnResolvedDocument => reply.success(Value::Null),
    })
}

/// Runs the full conflict handshake synchronously: the notice is sent from
/// inside `exec`, and the final message is sent from inside the
/// `returnResolvedDocument` call, on the original channel.
pub fn conflict_engine(conflicts: Vec<Value>, final_reply: Value) -> Arc<AutoEngine> {
    let channels: Mutex<HashMap<String, ReplySink>> = Mutex::new(HashMap::new());

    AutoEngine::new(move |call, reply| match call.operation {
        Operation::CreateDatastoreManager => reply.success(json!({"id": "dsm-1"})),
        Operation::OpenDatastore => reply.success(json!({"name": call.args[1]})),
        Operation::ResolveConflictsForDocument => {
            let token = format!("t{}", call.id.as_u64());
            channels.lock().insert(token.clone(), reply.clone());
            reply.success(json!({
                "docId": call.args[1],
                "conflicts": conflicts,
                "resolverId": token
            }));
        }
        Operation::ReturnResolvedDocument => {
            reply.success(Value::Null);
            let token = call.args[1].as_str().unwrap_or_default().to_string();
            let channel = channels.lock().remove(&token);
            if let Some(channel) = channel {
                channel.success(final_reply.clone());
            }
        }
        _ => reply.success(Value::Null),
    })
}

// ============================================================================
// Client helpers
// ============================================================================

pub fn client(engine: Arc<dyn Engine>) -> SyncClient {
    SyncClient::new(engine, ClientConfig::default())
}

/// Opens `name` against an engine that replies synchronously.
pub async fn open_auto(client: &SyncClient, name: &str) -> Datastore {
    let manager = client
        .datastore_manager(ManagerOptions::with_path("/tmp/cloudant-sync-tests"), None)
        .await
        .unwrap();
    manager.open_datastore(name, None).unwrap().await.unwrap()
}

/// Opens `name` against a scripted engine, answering the lifecycle calls.
pub async fn open_scripted(engine: &ScriptedEngine, client: &SyncClient, name: &str) -> Datastore {
    let pending = client.datastore_manager(ManagerOptions::with_path("/tmp/cloudant-sync-tests"), None);
    let index = engine.last(Operation::CreateDatastoreManager).unwrap();
    engine.success(index, json!({"id": "dsm-1"}));
    let manager = pending.await.unwrap();

    let pending = manager.open_datastore(name, None).unwrap();
    let index = engine.last(Operation::OpenDatastore).unwrap();
    engine.success(index, json!({"name": name}));
    pending.await.unwrap()
}

pub fn leaf(id: &str, rev: &str, body: Value) -> Value {
    let mut doc = body;
    doc["_id"] = json!(id);
    doc["_rev"] = json!(rev);
    doc
}
