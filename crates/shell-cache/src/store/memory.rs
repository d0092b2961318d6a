//! In-process named stores

use super::{ensure_storable, CacheStorage, NamedCache};
use crate::error::CacheError;
use crate::types::{AssetRequest, AssetResponse, CacheStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, (AssetRequest, AssetResponse)>,
    /// Keys in insertion order
    order: Vec<String>,
}

/// A named store held entirely in memory
pub struct MemoryCache {
    name: String,
    entries: RwLock<Entries>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(Entries::default()),
        }
    }

    async fn usage(&self) -> (usize, u64) {
        let entries = self.entries.read().await;
        let size = entries
            .by_key
            .values()
            .map(|(_, response)| response.content_length())
            .sum();
        (entries.by_key.len(), size)
    }
}

#[async_trait]
impl NamedCache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>, CacheError> {
        if !request.is_get() {
            return Ok(None);
        }
        let entries = self.entries.read().await;
        Ok(entries
            .by_key
            .get(&request.cache_key())
            .map(|(_, response)| response.duplicate()))
    }

    async fn put(&self, request: &AssetRequest, response: AssetResponse) -> Result<(), CacheError> {
        ensure_storable(request)?;
        let key = request.cache_key();

        let mut entries = self.entries.write().await;
        if entries
            .by_key
            .insert(key.clone(), (request.clone(), response))
            .is_none()
        {
            entries.order.push(key.clone());
        }
        debug!(cache = %self.name, key = %key, "Stored entry");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<AssetRequest>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .order
            .iter()
            .filter_map(|key| entries.by_key.get(key).map(|(request, _)| request.clone()))
            .collect())
    }

    async fn delete(&self, request: &AssetRequest) -> Result<bool, CacheError> {
        let key = request.cache_key();
        let mut entries = self.entries.write().await;
        let removed = entries.by_key.remove(&key).is_some();
        if removed {
            entries.order.retain(|k| k != &key);
        }
        Ok(removed)
    }
}

/// Named stores that live as long as the process
#[derive(Default)]
pub struct MemoryCacheStorage {
    /// Stores in creation order
    stores: RwLock<Vec<Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn NamedCache>, CacheError> {
        let mut stores = self.stores.write().await;
        if let Some(existing) = stores.iter().find(|s| s.name == name) {
            return Ok(existing.clone());
        }

        let created = Arc::new(MemoryCache::new(name));
        stores.push(created.clone());
        debug!(cache = name, "Created store");
        Ok(created)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.stores.read().await.iter().any(|s| s.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let stores = self.stores.read().await.clone();
        let mut stats = CacheStats {
            stores: stores.len(),
            ..CacheStats::default()
        };
        for store in stores {
            let (entries, size) = store.usage().await;
            stats.entries += entries;
            stats.total_size += size;
        }
        Ok(stats)
    }
}
