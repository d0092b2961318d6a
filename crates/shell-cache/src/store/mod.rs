//! Named cache stores keyed by request identity
//!
//! A [`CacheStorage`] holds any number of [`NamedCache`]s addressed by name.
//! Every store follows the same rules: only GET requests are matched or
//! stored, and a `put` replaces any entry under the same key.

mod file;
mod memory;

pub use file::{FileCache, FileCacheStorage};
pub use memory::{MemoryCache, MemoryCacheStorage};

use crate::error::CacheError;
use crate::network::Network;
use crate::types::{AssetRequest, AssetResponse, CacheStats};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// A single named store of request/response pairs
#[async_trait]
pub trait NamedCache: Send + Sync {
    fn name(&self) -> &str;

    /// Look up the stored response for `request`
    async fn match_request(&self, request: &AssetRequest)
        -> Result<Option<AssetResponse>, CacheError>;

    /// Store `response` under the identity of `request`
    async fn put(&self, request: &AssetRequest, response: AssetResponse)
        -> Result<(), CacheError>;

    /// Stored requests in insertion order
    async fn keys(&self) -> Result<Vec<AssetRequest>, CacheError>;

    async fn delete(&self, request: &AssetRequest) -> Result<bool, CacheError>;
}

/// The set of named stores available to a policy
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store called `name`, creating it if absent
    async fn open(&self, name: &str) -> Result<Arc<dyn NamedCache>, CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a store and every entry in it
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Store names in creation order
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Fetch every request and store the results.
///
/// Nothing is written unless every fetch succeeds with an ok status.
pub async fn add_all(
    cache: &dyn NamedCache,
    network: &dyn Network,
    requests: Vec<AssetRequest>,
) -> Result<(), CacheError> {
    for request in &requests {
        if !request.is_get() {
            return Err(CacheError::UnsupportedMethod(request.method.clone()));
        }
    }

    let responses = try_join_all(requests.iter().map(|request| async move {
        let response = network.fetch(request).await?;
        if !response.is_ok() {
            return Err(CacheError::BadResponse {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok::<_, CacheError>(response)
    }))
    .await?;

    for (request, response) in requests.iter().zip(responses) {
        cache.put(request, response).await?;
    }

    debug!(cache = cache.name(), count = requests.len(), "Stored all requests");
    Ok(())
}

/// Reject requests a store can never hold
pub(crate) fn ensure_storable(request: &AssetRequest) -> Result<(), CacheError> {
    if request.is_get() {
        Ok(())
    } else {
        Err(CacheError::UnsupportedMethod(request.method.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{url, ScriptedNetwork};

    #[tokio::test]
    async fn test_add_all_stores_every_asset() {
        let network = ScriptedNetwork::new()
            .with_asset("http://app.test/index.html", "<html>")
            .with_asset("http://app.test/manifest.json", "{}");
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();

        let requests = vec![
            AssetRequest::get(url("http://app.test/index.html")),
            AssetRequest::get(url("http://app.test/manifest.json")),
        ];
        add_all(cache.as_ref(), &network, requests).await.unwrap();

        assert_eq!(cache.keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_all_is_all_or_nothing() {
        let network = ScriptedNetwork::new()
            .with_asset("http://app.test/index.html", "<html>")
            .with_status("http://app.test/manifest.json", 404);
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();

        let requests = vec![
            AssetRequest::get(url("http://app.test/index.html")),
            AssetRequest::get(url("http://app.test/manifest.json")),
        ];
        let err = add_all(cache.as_ref(), &network, requests).await.unwrap_err();

        assert!(matches!(err, CacheError::BadResponse { status: 404, .. }));
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_all_fails_when_offline() {
        let network = ScriptedNetwork::new();
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();

        let requests = vec![AssetRequest::get(url("http://app.test/index.html"))];
        let err = add_all(cache.as_ref(), &network, requests).await.unwrap_err();

        assert!(matches!(err, CacheError::Network(_)));
    }

    #[tokio::test]
    async fn test_add_all_rejects_non_get() {
        let network = ScriptedNetwork::new();
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();

        let requests = vec![AssetRequest::new("POST", url("http://app.test/form"))];
        let err = add_all(cache.as_ref(), &network, requests).await.unwrap_err();

        assert!(matches!(err, CacheError::UnsupportedMethod(_)));
        assert_eq!(network.calls(), 0);
    }
}
