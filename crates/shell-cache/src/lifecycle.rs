//! Registration and lifecycle of policy instances
//!
//! A worker moves through `parsed → installing → installed → activating →
//! activated`, or becomes `redundant` when its install fails or a newer
//! worker replaces it. A worker takes the active slot as soon as it starts
//! activating, so fetches never reach a worker whose generation is being
//! purged.

use crate::dispatch::{Dispatched, Dispatcher, Event, ExtendableEvent, Reply};
use crate::error::Result;
use crate::network::Network;
use crate::policy::CachePolicy;
use crate::scope::{ClientId, Clients, WorkerId, WorkerScope};
use crate::store::CacheStorage;
use crate::types::{AssetRequest, CachePolicyConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Snapshot of one worker for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub version: String,
    pub state: WorkerState,
}

struct Worker {
    scope: Arc<WorkerScope>,
    dispatcher: Dispatcher,
    version: String,
    state: RwLock<WorkerState>,
}

impl Worker {
    fn id(&self) -> WorkerId {
        self.scope.id()
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        info!(worker = self.id(), version = %self.version, state = ?state, "Worker state changed");
    }

    async fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id(),
            version: self.version.clone(),
            state: *self.state.read().await,
        }
    }
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<Worker>>,
    waiting: Option<Arc<Worker>>,
    active: Option<Arc<Worker>>,
}

/// Owns the workers registered for one scope
pub struct Registration {
    scope_url: Url,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Clients,
    next_worker: AtomicU64,
    slots: RwLock<Slots>,
    /// Serializes register and activation jobs
    jobs: Mutex<()>,
}

impl Registration {
    pub fn new(scope_url: Url, caches: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            scope_url,
            caches,
            network,
            clients: Clients::new(),
            next_worker: AtomicU64::new(0),
            slots: RwLock::new(Slots::default()),
            jobs: Mutex::new(()),
        }
    }

    pub fn scope_url(&self) -> &Url {
        &self.scope_url
    }

    pub fn caches(&self) -> &Arc<dyn CacheStorage> {
        &self.caches
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Install a [`CachePolicy`] built from `config`
    pub async fn register_policy(&self, config: CachePolicyConfig) -> Result<WorkerId> {
        let version = config.version.clone();
        self.register(&version, move |scope, dispatcher| {
            Arc::new(CachePolicy::new(config, scope)).register(dispatcher)
        })
        .await
    }

    /// Install a new worker whose handlers are bound by `script`.
    ///
    /// Returns once the worker is installed and, if nothing holds it back,
    /// activated. A failed install leaves the current worker in place.
    pub async fn register<F>(&self, version: &str, script: F) -> Result<WorkerId>
    where
        F: FnOnce(Arc<WorkerScope>, &mut Dispatcher),
    {
        let _job = self.jobs.lock().await;

        let id = self.next_worker.fetch_add(1, Ordering::Relaxed) + 1;
        let scope = Arc::new(WorkerScope::new(
            id,
            self.scope_url.clone(),
            Arc::clone(&self.caches),
            Arc::clone(&self.network),
            self.clients.clone(),
        ));
        let mut dispatcher = Dispatcher::new();
        script(Arc::clone(&scope), &mut dispatcher);

        let worker = Arc::new(Worker {
            scope,
            dispatcher,
            version: version.to_string(),
            state: RwLock::new(WorkerState::Parsed),
        });

        self.slots.write().await.installing = Some(Arc::clone(&worker));
        worker.set_state(WorkerState::Installing).await;

        if let Err(e) = worker.dispatcher.dispatch(Event::Install).await {
            warn!(worker = id, version, error = %e, "Install failed");
            self.slots.write().await.installing = None;
            worker.set_state(WorkerState::Redundant).await;
            return Err(e);
        }

        let replaced = {
            let mut slots = self.slots.write().await;
            slots.installing = None;
            slots.waiting.replace(Arc::clone(&worker))
        };
        if let Some(replaced) = replaced {
            replaced.set_state(WorkerState::Redundant).await;
        }
        worker.set_state(WorkerState::Installed).await;

        self.try_activate().await;
        Ok(id)
    }

    /// Register a new client context controlled by the active worker
    pub async fn open_client(&self) -> ClientId {
        let controller = self.slots.read().await.active.as_ref().map(|w| w.id());
        self.clients.open(controller).await
    }

    /// Close a client; a waiting worker may become active as a result
    pub async fn close_client(&self, id: ClientId) -> bool {
        let _job = self.jobs.lock().await;
        let closed = self.clients.close(id).await;
        if closed {
            self.try_activate().await;
        }
        closed
    }

    /// Route an intercepted request to the active worker
    pub async fn fetch(&self, request: AssetRequest) -> Result<Dispatched> {
        let active = self.slots.read().await.active.clone();
        match active {
            Some(worker) => worker.dispatcher.dispatch(Event::Fetch(request)).await,
            None => Ok(Dispatched {
                reply: Reply::PassThrough,
                extension: ExtendableEvent::new(),
            }),
        }
    }

    pub async fn active(&self) -> Option<WorkerInfo> {
        let worker = self.slots.read().await.active.clone();
        match worker {
            Some(worker) => Some(worker.info().await),
            None => None,
        }
    }

    pub async fn waiting(&self) -> Option<WorkerInfo> {
        let worker = self.slots.read().await.waiting.clone();
        match worker {
            Some(worker) => Some(worker.info().await),
            None => None,
        }
    }

    /// Activate the waiting worker unless clients still depend on the active one.
    ///
    /// Callers hold the job lock.
    async fn try_activate(&self) -> bool {
        let (waiting, active) = {
            let slots = self.slots.read().await;
            (slots.waiting.clone(), slots.active.clone())
        };
        let Some(waiting) = waiting else {
            return false;
        };

        let ready = match &active {
            None => true,
            Some(active) => {
                waiting.scope.skip_waiting_requested()
                    || self.clients.controlled_by(active.id()).await == 0
            }
        };
        if !ready {
            info!(worker = waiting.id(), version = %waiting.version, "Worker waiting for clients to close");
            return false;
        }

        self.activate(waiting).await;
        true
    }

    async fn activate(&self, worker: Arc<Worker>) {
        let previous = {
            let mut slots = self.slots.write().await;
            slots.waiting = None;
            slots.active.replace(Arc::clone(&worker))
        };
        if let Some(previous) = previous {
            previous.set_state(WorkerState::Redundant).await;
        }
        worker.set_state(WorkerState::Activating).await;

        if let Err(e) = worker.dispatcher.dispatch(Event::Activate).await {
            warn!(worker = worker.id(), version = %worker.version, error = %e, "Activate handler failed");
        }
        worker.set_state(WorkerState::Activated).await;
    }
}
