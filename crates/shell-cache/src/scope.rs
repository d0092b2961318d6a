//! What a running policy instance can reach: stores, network and clients

use crate::error::Result;
use crate::network::Network;
use crate::store::CacheStorage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

pub type WorkerId = u64;
pub type ClientId = u64;

/// Open page contexts and the worker controlling each one
#[derive(Clone, Default)]
pub struct Clients {
    controllers: Arc<RwLock<HashMap<ClientId, Option<WorkerId>>>>,
    next_id: Arc<AtomicU64>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client, optionally already controlled by `controller`
    pub async fn open(&self, controller: Option<WorkerId>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.controllers.write().await.insert(id, controller);
        id
    }

    pub async fn close(&self, id: ClientId) -> bool {
        self.controllers.write().await.remove(&id).is_some()
    }

    pub async fn controller(&self, id: ClientId) -> Option<WorkerId> {
        self.controllers.read().await.get(&id).copied().flatten()
    }

    pub async fn controlled_by(&self, worker: WorkerId) -> usize {
        self.controllers
            .read()
            .await
            .values()
            .filter(|c| **c == Some(worker))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.controllers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make `worker` the controller of every open client; returns how many changed
    pub async fn claim(&self, worker: WorkerId) -> usize {
        let mut controllers = self.controllers.write().await;
        let mut changed = 0;
        for controller in controllers.values_mut() {
            if *controller != Some(worker) {
                *controller = Some(worker);
                changed += 1;
            }
        }
        changed
    }
}

/// Environment handed to one policy instance
pub struct WorkerScope {
    id: WorkerId,
    scope_url: Url,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Clients,
    skip_waiting: AtomicBool,
}

impl WorkerScope {
    pub fn new(
        id: WorkerId,
        scope_url: Url,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Clients,
    ) -> Self {
        Self {
            id,
            scope_url,
            caches,
            network,
            clients,
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn scope_url(&self) -> &Url {
        &self.scope_url
    }

    pub fn caches(&self) -> &Arc<dyn CacheStorage> {
        &self.caches
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Ask to be activated without waiting for existing clients to close
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        debug!(worker = self.id, "Skip waiting requested");
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Take control of every open client
    pub async fn claim_clients(&self) -> usize {
        let claimed = self.clients.claim(self.id).await;
        debug!(worker = self.id, claimed, "Claimed clients");
        claimed
    }

    /// Resolve a path relative to the scope URL
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.scope_url.join(path)?)
    }
}
