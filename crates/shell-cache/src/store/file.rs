//! Named stores persisted on disk
//!
//! Layout under the storage root:
//!
//! ```text
//! stores.json             store names in creation order
//! <hex(name)>/<sha>.json  entry metadata
//! <hex(name)>/<sha>.body  entry payload
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! torn write never leaves a half-written entry behind.

use super::{ensure_storable, CacheStorage, NamedCache};
use crate::error::CacheError;
use crate::types::{AssetRequest, AssetResponse, CacheEntry, CacheStats};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

const MANIFEST_FILE: &str = "stores.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write `data` next to `path` and rename it into place.
///
/// Every call gets its own temp file so concurrent writers never share one.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.{}.tmp", std::process::id(), seq));
    let tmp = path.with_file_name(tmp_name);

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// A named store backed by one directory
pub struct FileCache {
    name: String,
    dir: PathBuf,
    /// In-memory metadata keyed by request identity
    index: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key guards so a body and its metadata are swapped together
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl FileCache {
    /// Load every entry already present in `dir`
    async fn load(name: &str, dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read entry metadata");
                    continue;
                }
            };
            match serde_json::from_slice::<CacheEntry>(&raw) {
                Ok(entry) => {
                    index.insert(format!("{} {}", entry.method, entry.url), entry);
                }
                Err(e) => warn!(path = ?path, error = %e, "Skipping corrupt entry metadata"),
            }
        }

        debug!(cache = name, entries = index.len(), "Loaded store");
        Ok(Self {
            name: name.to_string(),
            dir,
            index: RwLock::new(index),
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn key_lock(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// File stem for a request identity
    pub fn entry_stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn body_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.body", stem))
    }

    fn meta_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.json", stem))
    }

    async fn remove_files(&self, stem: &str) {
        // Missing files are fine here
        let _ = fs::remove_file(self.meta_path(stem)).await;
        let _ = fs::remove_file(self.body_path(stem)).await;
    }

    async fn usage(&self) -> (usize, u64) {
        let index = self.index.read().await;
        (index.len(), index.values().map(|e| e.size).sum())
    }
}

#[async_trait]
impl NamedCache for FileCache {
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

        let key = request.cache_key();
        let guard = self.key_lock(&key).await;
        let _reading = guard.read().await;
        let entry = {
            let index = self.index.read().await;
            index.get(&key).cloned()
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        let stem = Self::entry_stem(&key);
        match fs::read(self.body_path(&stem)).await {
            Ok(data) => {
                let mut response = AssetResponse::new(entry.status, entry.response_type, data);
                response.url = entry.response_url.as_deref().and_then(|u| Url::parse(u).ok());
                response.headers = entry.headers;
                Ok(Some(response))
            }
            Err(e) => {
                warn!(cache = %self.name, key = %key, error = %e, "Failed to read cached body, removing entry");
                self.index.write().await.remove(&key);
                self.remove_files(&stem).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, request: &AssetRequest, response: AssetResponse) -> Result<(), CacheError> {
        ensure_storable(request)?;

        let key = request.cache_key();
        let stem = Self::entry_stem(&key);
        let mut url = request.url.clone();
        url.set_fragment(None);

        let entry = CacheEntry {
            method: request.method.clone(),
            url: url.to_string(),
            status: response.status,
            response_type: response.response_type,
            response_url: response.url.as_ref().map(|u| u.to_string()),
            headers: response.headers.clone(),
            size: response.content_length(),
            stored_at: Utc::now(),
        };
        let body = response.into_body();

        let guard = self.key_lock(&key).await;
        let _writing = guard.write().await;
        write_atomic(&self.body_path(&stem), &body).await?;
        write_atomic(&self.meta_path(&stem), &serde_json::to_vec_pretty(&entry)?).await?;

        let size = entry.size;
        self.index.write().await.insert(key.clone(), entry);
        debug!(cache = %self.name, key = %key, size, "Stored entry");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<AssetRequest>, CacheError> {
        let mut entries: Vec<CacheEntry> = self.index.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.url.cmp(&b.url)));

        Ok(entries
            .into_iter()
            .filter_map(|e| Url::parse(&e.url).ok().map(|u| AssetRequest::new(&e.method, u)))
            .collect())
    }

    async fn delete(&self, request: &AssetRequest) -> Result<bool, CacheError> {
        let key = request.cache_key();
        let guard = self.key_lock(&key).await;
        let _writing = guard.write().await;
        let removed = self.index.write().await.remove(&key).is_some();
        if removed {
            self.remove_files(&Self::entry_stem(&key)).await;
        }
        Ok(removed)
    }
}

/// Named stores under one root directory, surviving process restarts
pub struct FileCacheStorage {
    root: PathBuf,
    /// Store names in creation order, mirrored to `stores.json`
    manifest: RwLock<Vec<String>>,
    opened: RwLock<HashMap<String, Arc<FileCache>>>,
}

impl FileCacheStorage {
    /// Open the storage rooted at `root`, creating the directory if needed
    pub async fn open_at(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root).await?;

        let manifest = match fs::read(root.join(MANIFEST_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(root = ?root, stores = ?manifest, "Cache storage initialized");
        Ok(Self {
            root,
            manifest: RwLock::new(manifest),
            opened: RwLock::new(HashMap::new()),
        })
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }

    async fn persist_manifest(&self, names: &[String]) -> Result<(), CacheError> {
        write_atomic(&self.root.join(MANIFEST_FILE), &serde_json::to_vec(names)?).await
    }
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn NamedCache>, CacheError> {
        if let Some(existing) = self.opened.read().await.get(name) {
            return Ok(existing.clone());
        }

        let mut manifest = self.manifest.write().await;
        // Another caller may have opened it while we waited
        if let Some(existing) = self.opened.read().await.get(name) {
            return Ok(existing.clone());
        }

        if !manifest.iter().any(|n| n == name) {
            manifest.push(name.to_string());
            self.persist_manifest(&manifest).await?;
            debug!(cache = name, "Created store");
        }

        let cache = Arc::new(FileCache::load(name, self.store_dir(name)).await?);
        self.opened
            .write()
            .await
            .insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.manifest.read().await.iter().any(|n| n == name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut manifest = self.manifest.write().await;
        if !manifest.iter().any(|n| n == name) {
            return Ok(false);
        }

        manifest.retain(|n| n != name);
        self.persist_manifest(&manifest).await?;
        self.opened.write().await.remove(name);

        match fs::remove_dir_all(self.store_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(cache = name, "Deleted store");
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.manifest.read().await.clone())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let names = self.keys().await?;
        let mut stats = CacheStats {
            stores: names.len(),
            ..CacheStats::default()
        };

        for name in names {
            let opened = self.opened.read().await.get(&name).cloned();
            let cache = match opened {
                Some(cache) => cache,
                None => Arc::new(FileCache::load(&name, self.store_dir(&name)).await?),
            };
            let (entries, size) = cache.usage().await;
            stats.entries += entries;
            stats.total_size += size;
        }
        Ok(stats)
    }
}
