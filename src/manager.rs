//! Client context and datastore manager
//!
//! [`SyncClient`] is the one process-wide context: it owns the engine
//! handle, the call id generator, the conflict coordinator and the cache of
//! manager identities. A [`DatastoreManager`] is created once per storage
//! path and hands out [`Datastore`] handles.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::{decoded, unit, Callback, CallAdapter, Completion, Pending};
use crate::bridge::{Engine, Operation, Reply};
use crate::config::{normalize_path, ClientConfig};
use crate::conflict::ConflictCoordinator;
use crate::datastore::Datastore;
use crate::error::{EngineError, SyncError, SyncResult, ValidationError};
use crate::validation;

/// Options for [`SyncClient::datastore_manager`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Directory the datastores live in. Defaults to the configured path.
    pub path: Option<PathBuf>,
}

impl ManagerOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

/// Opaque identity the engine assigns to a datastore manager (`dsmID`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerId(Value);

impl ManagerId {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Deserialize)]
struct ManagerCreated {
    id: ManagerId,
}

#[derive(Deserialize)]
struct DatastoreOpened {
    name: String,
}

/// Per-path manager state. While the engine is creating a manager, later
/// requests for the same path queue behind the first call.
enum ManagerSlot {
    Creating(Vec<Completion<DatastoreManager>>),
    Ready(ManagerId),
}

pub(crate) struct ClientContext {
    pub(crate) adapter: CallAdapter,
    pub(crate) coordinator: ConflictCoordinator,
    pub(crate) config: ClientConfig,
    managers: Mutex<HashMap<PathBuf, ManagerSlot>>,
}

/// The one in-flight `createDatastoreManager` for a path. Settling it
/// records the outcome and wakes every queued request; dropping it
/// unsettled (the engine released the call) fails them with `Dropped`.
struct ManagerCreation {
    path: PathBuf,
    context: Arc<ClientContext>,
    settled: bool,
}

impl ManagerCreation {
    fn finish(mut self, outcome: SyncResult<ManagerId>) -> SyncResult<DatastoreManager> {
        self.settle(outcome)
    }

    fn settle(&mut self, outcome: SyncResult<ManagerId>) -> SyncResult<DatastoreManager> {
        self.settled = true;
        let waiters = {
            let mut managers = self.context.managers.lock();
            let waiters = match managers.remove(&self.path) {
                Some(ManagerSlot::Creating(waiters)) => waiters,
                Some(ManagerSlot::Ready(id)) => {
                    managers.insert(self.path.clone(), ManagerSlot::Ready(id));
                    Vec::new()
                }
                None => Vec::new(),
            };
            // Failures are not cached; the next request asks the engine again
            if let Ok(id) = &outcome {
                managers.insert(self.path.clone(), ManagerSlot::Ready(id.clone()));
            }
            waiters
        };

        let outcome =
            outcome.map(|id| DatastoreManager::new(self.path.clone(), id, self.context.clone()));
        for waiter in waiters {
            waiter.complete(outcome.clone());
        }
        outcome
    }
}

impl Drop for ManagerCreation {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Datastore manager creation for {} abandoned by the engine", self.path.display());
            let _ = self.settle(Err(EngineError::Dropped.into()));
        }
    }
}

/// Entry point of the client.
#[derive(Clone)]
pub struct SyncClient {
    context: Arc<ClientContext>,
}

impl SyncClient {
    pub fn new(engine: Arc<dyn Engine>, config: ClientConfig) -> Self {
        let adapter = CallAdapter::new(engine);
        let coordinator = ConflictCoordinator::new(adapter.clone(), config.resolver_failure);
        Self {
            context: Arc::new(ClientContext {
                adapter,
                coordinator,
                config,
                managers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.context.config
    }

    pub fn coordinator(&self) -> &ConflictCoordinator {
        &self.context.coordinator
    }

    /// Number of boundary calls issued so far.
    pub fn calls_issued(&self) -> u64 {
        self.context.adapter.ids().issued()
    }

    /// Creates the manager for `options.path` (or the configured default).
    ///
    /// The engine is asked only once per path. Requests made while that
    /// call is in flight wait for its outcome; later requests resolve
    /// immediately with the same identity.
    pub fn datastore_manager(
        &self,
        options: ManagerOptions,
        callback: Option<Callback<DatastoreManager>>,
    ) -> Pending<DatastoreManager> {
        let path = match &options.path {
            Some(path) => normalize_path(path),
            None => self.context.config.default_manager_path(),
        };

        let mut managers = self.context.managers.lock();
        match managers.get_mut(&path) {
            Some(ManagerSlot::Ready(id)) => {
                let id = id.clone();
                drop(managers);
                debug!("Reusing datastore manager for {}", path.display());
                let manager = DatastoreManager::new(path, id, self.context.clone());
                return Pending::ready(Ok(manager), callback);
            }
            Some(ManagerSlot::Creating(waiters)) => {
                debug!("Waiting on datastore manager creation for {}", path.display());
                let (completion, pending) = Completion::new(callback);
                waiters.push(completion);
                return pending;
            }
            None => {
                managers.insert(path.clone(), ManagerSlot::Creating(Vec::new()));
            }
        }
        drop(managers);

        let creation = ManagerCreation {
            path: path.clone(),
            context: self.context.clone(),
            settled: false,
        };
        self.context.adapter.call(
            Operation::CreateDatastoreManager,
            vec![json!(path.to_string_lossy())],
            move |reply: Reply| {
                let outcome = decoded::<ManagerCreated>(reply).map(|created| created.id);
                if outcome.is_ok() {
                    info!("Datastore manager ready at {}", creation.path.display());
                }
                creation.finish(outcome)
            },
            callback,
        )
    }
}

/// Opens and deletes named datastores under one storage path.
#[derive(Clone)]
pub struct DatastoreManager {
    path: PathBuf,
    id: ManagerId,
    context: Arc<ClientContext>,
}

impl std::fmt::Debug for DatastoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreManager")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish()
    }
}

impl DatastoreManager {
    fn new(path: PathBuf, id: ManagerId, context: Arc<ClientContext>) -> Self {
        Self { path, id, context }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &ManagerId {
        &self.id
    }

    /// Opens `name`, creating it on disk if it does not exist yet.
    pub fn open_datastore(
        &self,
        name: &str,
        callback: Option<Callback<Datastore>>,
    ) -> Result<Pending<Datastore>, ValidationError> {
        validation::validate_name(name)?;

        let context = self.context.clone();
        Ok(self.context.adapter.call(
            Operation::OpenDatastore,
            vec![self.id.0.clone(), json!(name)],
            move |reply| {
                let opened: DatastoreOpened = decoded(reply)?;
                if opened.name.is_empty() {
                    return Err(SyncError::Engine(EngineError::MalformedReply(
                        "openDatastore returned an empty name".to_string(),
                    )));
                }
                info!("Datastore '{}' opened", opened.name);
                Ok(Datastore::new(opened.name, context))
            },
            callback,
        ))
    }

    /// Deletes the datastore's files. Open handles to it become unusable at
    /// the engine level.
    pub fn delete_datastore(
        &self,
        name: &str,
        callback: Option<Callback<()>>,
    ) -> Result<Pending<()>, ValidationError> {
        validation::validate_name(name)?;
        Ok(self.context.adapter.call(
            Operation::DeleteDatastore,
            vec![self.id.0.clone(), json!(name)],
            unit,
            callback,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BoundaryCall, ReplySink};

    struct Silent;

    impl Engine for Silent {
        fn exec(&self, _call: BoundaryCall, _reply: ReplySink) {}
    }

    #[test]
    fn test_manager_options() {
        assert_eq!(ManagerOptions::default().path, None);
        assert_eq!(
            ManagerOptions::with_path("/tmp/x").path,
            Some(PathBuf::from("/tmp/x"))
        );
    }

    #[test]
    fn test_manager_id_is_opaque() {
        let id: ManagerId = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(id.as_value(), &json!(3));
    }

    #[test]
    fn test_open_validates_before_boundary() {
        let client = SyncClient::new(Arc::new(Silent), ClientConfig::default());
        let manager = DatastoreManager::new(
            PathBuf::from("/tmp"),
            ManagerId(json!("m1")),
            client.context.clone(),
        );
        assert_eq!(
            manager.open_datastore("", None).unwrap_err(),
            ValidationError::Missing("name")
        );
        assert_eq!(
            manager.delete_datastore("", None).unwrap_err(),
            ValidationError::Missing("name")
        );
        assert_eq!(client.calls_issued(), 0);
    }
}
