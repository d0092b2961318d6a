//! Fakes shared by the unit tests

use crate::error::{CacheError, NetworkError};
use crate::network::Network;
use crate::store::{CacheStorage, NamedCache};
use crate::types::{AssetRequest, AssetResponse, CacheStats, ResponseType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[derive(Clone)]
struct Scripted {
    status: u16,
    response_type: ResponseType,
    body: Bytes,
}

/// Network fake answering from a fixed table; unknown URLs are unreachable
#[derive(Default)]
pub struct ScriptedNetwork {
    responses: HashMap<String, Scripted>,
    offline: AtomicBool,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, url: &str, body: &'static str) -> Self {
        self.with_response(url, 200, ResponseType::Basic, body)
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.with_response(url, status, ResponseType::Basic, "")
    }

    pub fn with_response(
        mut self,
        url: &str,
        status: u16,
        response_type: ResponseType,
        body: &'static str,
    ) -> Self {
        self.responses.insert(
            url.to_string(),
            Scripted {
                status,
                response_type,
                body: Bytes::from_static(body.as_bytes()),
            },
        );
        self
    }

    /// Answer every request only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(request.cache_key());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable(request.url.to_string()));
        }

        match self.responses.get(request.url.as_str()) {
            Some(scripted) if scripted.response_type == ResponseType::Opaque => {
                Ok(AssetResponse::opaque())
            }
            Some(scripted) => Ok(AssetResponse::new(
                scripted.status,
                scripted.response_type,
                scripted.body.clone(),
            )
            .with_url(request.url.clone())),
            None => Err(NetworkError::Unreachable(request.url.to_string())),
        }
    }
}

/// A store that never holds anything; every write fails
pub struct ReadOnlyCache {
    name: String,
    writes: AtomicUsize,
}

impl ReadOnlyCache {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NamedCache for ReadOnlyCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        _request: &AssetRequest,
    ) -> Result<Option<AssetResponse>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _request: &AssetRequest, _response: AssetResponse) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only store").into())
    }

    async fn keys(&self) -> Result<Vec<AssetRequest>, CacheError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _request: &AssetRequest) -> Result<bool, CacheError> {
        Ok(false)
    }
}

/// Storage whose single store rejects every write
pub struct ReadOnlyStorage {
    pub cache: Arc<ReadOnlyCache>,
}

impl ReadOnlyStorage {
    pub fn new(name: &str) -> Self {
        Self {
            cache: Arc::new(ReadOnlyCache {
                name: name.to_string(),
                writes: AtomicUsize::new(0),
            }),
        }
    }
}

#[async_trait]
impl CacheStorage for ReadOnlyStorage {
    async fn open(&self, _name: &str) -> Result<Arc<dyn NamedCache>, CacheError> {
        Ok(self.cache.clone())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(name == self.cache.name)
    }

    async fn delete(&self, _name: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(vec![self.cache.name.clone()])
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            stores: 1,
            ..CacheStats::default()
        })
    }
}
