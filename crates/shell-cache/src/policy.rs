//! Offline-first interception policy for the application shell
//!
//! * install: pre-populate the current generation with the core assets,
//!   best effort, and skip the waiting phase.
//! * activate: delete every generation except the current one, then claim
//!   open clients.
//! * fetch: GET requests are answered from the current generation, falling
//!   back to the network and storing successful same-origin responses. When
//!   the network is unreachable the cached shell document is served instead.

use crate::dispatch::{Dispatcher, Event, EventKind, ExtendableEvent, Reply};
use crate::error::{PolicyError, Result};
use crate::scope::WorkerScope;
use crate::store::{add_all, NamedCache};
use crate::types::{AssetRequest, AssetResponse, CachePolicyConfig, ResponseSource};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CachePolicy {
    config: CachePolicyConfig,
    scope: Arc<WorkerScope>,
}

impl CachePolicy {
    pub fn new(config: CachePolicyConfig, scope: Arc<WorkerScope>) -> Self {
        Self { config, scope }
    }

    /// Bind the install, activate and fetch handlers
    pub fn register(self: Arc<Self>, dispatcher: &mut Dispatcher) {
        let policy = Arc::clone(&self);
        dispatcher.on(EventKind::Install, move |_, extension| {
            policy.on_install(&extension);
            async { Ok(Reply::Done) }
        });

        let policy = Arc::clone(&self);
        dispatcher.on(EventKind::Activate, move |_, extension| {
            policy.on_activate(&extension);
            async { Ok(Reply::Done) }
        });

        let policy = self;
        dispatcher.on(EventKind::Fetch, move |event, extension| {
            let policy = Arc::clone(&policy);
            async move {
                match event {
                    Event::Fetch(request) => policy.on_fetch(request, &extension).await,
                    _ => Ok(Reply::PassThrough),
                }
            }
        });
    }

    /// Populate the core assets in the background and skip waiting right away
    pub fn on_install(self: &Arc<Self>, extension: &ExtendableEvent) {
        let policy = Arc::clone(self);
        extension.wait_until(async move {
            policy.populate_core().await;
            Ok(())
        });
        self.scope.skip_waiting();
    }

    /// Purge stale generations, then claim clients
    pub fn on_activate(self: &Arc<Self>, extension: &ExtendableEvent) {
        let policy = Arc::clone(self);
        extension.wait_until(async move {
            let purged = policy.purge_stale().await?;
            let claimed = policy.scope.claim_clients().await;
            info!(
                version = %policy.config.version,
                purged = ?purged,
                claimed,
                "Cache policy activated"
            );
            Ok(())
        });
    }

    /// Decide how to answer one intercepted request
    pub async fn on_fetch(
        &self,
        request: AssetRequest,
        extension: &ExtendableEvent,
    ) -> Result<Reply> {
        if !request.is_get() {
            debug!(method = %request.method, url = %request.url, "Not intercepting");
            return Ok(Reply::PassThrough);
        }

        let cache = self.scope.caches().open(&self.config.version).await?;

        if let Some(response) = lookup(cache.as_ref(), &request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(Reply::Respond {
                response,
                source: ResponseSource::Cache,
            });
        }

        debug!(url = %request.url, "Cache miss");
        match self.scope.network().fetch(&request).await {
            Ok(response) if response.is_cacheable() => {
                let copy = response.duplicate();
                let cache = Arc::clone(&cache);
                let key = request.clone();
                extension.wait_until(async move {
                    if let Err(e) = cache.put(&key, copy).await {
                        warn!(url = %key.url, error = %e, "Failed to cache response");
                    }
                    Ok(())
                });
                Ok(Reply::Respond {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Ok(response) => {
                debug!(
                    url = %request.url,
                    status = response.status,
                    response_type = ?response.response_type,
                    "Response not cacheable"
                );
                Ok(Reply::Respond {
                    response,
                    source: ResponseSource::NetworkUncached,
                })
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "Network failed, trying offline shell");
                let shell = AssetRequest::get(self.scope.resolve(&self.config.fallback_path)?);
                match lookup(cache.as_ref(), &shell).await {
                    Some(response) => Ok(Reply::Respond {
                        response,
                        source: ResponseSource::Fallback,
                    }),
                    None => Err(PolicyError::Offline {
                        url: request.url.to_string(),
                        source: err,
                    }),
                }
            }
        }
    }

    /// Fetch and store every core asset; failures are logged and dropped
    async fn populate_core(&self) {
        let version = &self.config.version;
        let requests: Result<Vec<AssetRequest>> = self
            .config
            .core_files
            .iter()
            .map(|path| Ok(AssetRequest::get(self.scope.resolve(path)?)))
            .collect();

        let outcome = match requests {
            Ok(requests) => match self.scope.caches().open(version).await {
                Ok(cache) => add_all(cache.as_ref(), self.scope.network().as_ref(), requests)
                    .await
                    .map_err(PolicyError::from),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => info!(
                version = %version,
                assets = self.config.core_files.len(),
                "Core assets cached"
            ),
            Err(e) => warn!(version = %version, error = %e, "Failed to cache core assets"),
        }
    }

    /// Delete every named store except the current generation
    async fn purge_stale(&self) -> Result<Vec<String>> {
        let caches = self.scope.caches();
        let stale: Vec<String> = caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != &self.config.version)
            .collect();

        let results = join_all(stale.iter().map(|name| caches.delete(name))).await;
        for (name, result) in stale.iter().zip(results) {
            result?;
            debug!(cache = %name, "Purged stale generation");
        }
        Ok(stale)
    }
}

/// Store lookup where a read failure counts as a miss
async fn lookup(cache: &dyn NamedCache, request: &AssetRequest) -> Option<AssetResponse> {
    match cache.match_request(request).await {
        Ok(found) => found,
        Err(e) => {
            warn!(url = %request.url, error = %e, "Cache lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Clients;
    use crate::store::{CacheStorage, MemoryCacheStorage};
    use crate::test_support::{url, ReadOnlyStorage, ScriptedNetwork};
    use crate::types::ResponseType;
    use std::time::Duration;

    const SCOPE: &str = "http://app.test/";

    struct Harness {
        storage: Arc<MemoryCacheStorage>,
        network: Arc<ScriptedNetwork>,
        clients: Clients,
        dispatcher: Dispatcher,
    }

    fn harness(version: &str, network: ScriptedNetwork) -> Harness {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(network);
        let clients = Clients::new();
        let scope = Arc::new(WorkerScope::new(
            1,
            url(SCOPE),
            storage.clone(),
            network.clone(),
            clients.clone(),
        ));
        let config = CachePolicyConfig {
            version: version.to_string(),
            ..CachePolicyConfig::default()
        };
        let mut dispatcher = Dispatcher::new();
        Arc::new(CachePolicy::new(config, scope)).register(&mut dispatcher);
        Harness {
            storage,
            network,
            clients,
            dispatcher,
        }
    }

    fn shell_network() -> ScriptedNetwork {
        ScriptedNetwork::new()
            .with_asset("http://app.test/index.html", "<html>shell</html>")
            .with_asset("http://app.test/manifest.json", "{}")
            .with_asset("http://app.test/flutter_bootstrap.js", "boot()")
    }

    async fn fetch(h: &Harness, request: AssetRequest) -> Result<(Reply, ExtendableEvent)> {
        let dispatched = h.dispatcher.dispatch(Event::Fetch(request)).await?;
        Ok((dispatched.reply, dispatched.extension))
    }

    async fn stored_paths(h: &Harness, version: &str) -> Vec<String> {
        let cache = h.storage.open(version).await.unwrap();
        let mut paths: Vec<String> = cache
            .keys()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.url.path().to_string())
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_install_populates_core_assets() {
        let h = harness("v1", shell_network());
        h.dispatcher.dispatch(Event::Install).await.unwrap();

        assert_eq!(
            stored_paths(&h, "v1").await,
            vec!["/flutter_bootstrap.js", "/index.html", "/manifest.json"]
        );
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let h = harness("v1", shell_network());
        h.dispatcher.dispatch(Event::Install).await.unwrap();
        let once = stored_paths(&h, "v1").await;

        h.dispatcher.dispatch(Event::Install).await.unwrap();
        assert_eq!(stored_paths(&h, "v1").await, once);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_install_succeeds_when_an_asset_is_unreachable() {
        let network = ScriptedNetwork::new().with_asset("http://app.test/index.html", "<html>");
        let h = harness("v1", network);

        let dispatched = h.dispatcher.dispatch(Event::Install).await;
        assert!(dispatched.is_ok());
        assert!(h.storage.has("v1").await.unwrap());
        assert!(stored_paths(&h, "v1").await.is_empty());
    }

    #[tokio::test]
    async fn test_activate_purges_stale_generations() {
        let h = harness("v2", ScriptedNetwork::new());
        h.storage.open("v1").await.unwrap();
        h.storage.open("v2").await.unwrap();

        h.dispatcher.dispatch(Event::Activate).await.unwrap();
        assert_eq!(h.storage.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_activate_claims_clients_after_purge() {
        let h = harness("v2", ScriptedNetwork::new());
        h.storage.open("v1").await.unwrap();
        let client = h.clients.open(None).await;

        h.dispatcher.dispatch(Event::Activate).await.unwrap();
        assert_eq!(h.clients.controller(client).await, Some(1));
        assert!(!h.storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_post_is_never_intercepted() {
        let h = harness("v1", shell_network());
        let cache = h.storage.open("v1").await.unwrap();
        cache
            .put(
                &AssetRequest::get(url("http://app.test/api/forecast")),
                AssetResponse::basic(200, "cached"),
            )
            .await
            .unwrap();

        let post = AssetRequest::new("POST", url("http://app.test/api/forecast")).with_body("{}");
        let (reply, extension) = fetch(&h, post).await.unwrap();
        extension.settled().await.unwrap();

        assert!(matches!(reply, Reply::PassThrough));
        assert_eq!(h.network.calls(), 0);
        assert_eq!(cache.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let h = harness("v1", shell_network());
        let cache = h.storage.open("v1").await.unwrap();
        let request = AssetRequest::get(url("http://app.test/main.dart.js"));
        cache
            .put(&request, AssetResponse::basic(200, "cached body"))
            .await
            .unwrap();

        let (reply, _) = fetch(&h, request).await.unwrap();
        match reply {
            Reply::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Cache);
                assert_eq!(response.into_body(), "cached body");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(h.network.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_miss_populates_store() {
        let network = ScriptedNetwork::new().with_asset("http://app.test/main.dart.js", "main()");
        let h = harness("v1", network);
        let request = AssetRequest::get(url("http://app.test/main.dart.js"));

        let (reply, extension) = fetch(&h, request.clone()).await.unwrap();
        match reply {
            Reply::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Network);
                assert_eq!(response.status, 200);
                assert_eq!(response.into_body(), "main()");
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        extension.settled().await.unwrap();
        let cache = h.storage.open("v1").await.unwrap();
        let stored = cache.match_request(&request).await.unwrap().unwrap();
        assert_eq!(stored.into_body(), "main()");

        let (reply, _) = fetch(&h, request).await.unwrap();
        assert!(matches!(
            reply,
            Reply::Respond {
                source: ResponseSource::Cache,
                ..
            }
        ));
        assert_eq!(h.network.requested(), vec!["GET http://app.test/main.dart.js"]);
    }

    #[tokio::test]
    async fn test_offline_falls_back_to_shell() {
        let h = harness("v1", ScriptedNetwork::new());
        let cache = h.storage.open("v1").await.unwrap();
        cache
            .put(
                &AssetRequest::get(url("http://app.test/index.html")),
                AssetResponse::basic(200, "<html>shell</html>"),
            )
            .await
            .unwrap();

        let (reply, _) = fetch(&h, AssetRequest::get(url("http://app.test/icons/logo.png")))
            .await
            .unwrap();
        match reply {
            Reply::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Fallback);
                assert_eq!(response.into_body(), "<html>shell</html>");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_without_shell_fails() {
        let h = harness("v1", ScriptedNetwork::new());
        let result = fetch(&h, AssetRequest::get(url("http://app.test/index.html"))).await;
        assert!(matches!(result, Err(PolicyError::Offline { .. })));
    }

    #[tokio::test]
    async fn test_not_found_is_passed_through_uncached() {
        let network = ScriptedNetwork::new().with_status("http://app.test/missing.js", 404);
        let h = harness("v1", network);
        let request = AssetRequest::get(url("http://app.test/missing.js"));

        let (reply, extension) = fetch(&h, request.clone()).await.unwrap();
        extension.settled().await.unwrap();
        match reply {
            Reply::Respond { response, source } => {
                assert_eq!(source, ResponseSource::NetworkUncached);
                assert_eq!(response.status, 404);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let cache = h.storage.open("v1").await.unwrap();
        assert!(cache.match_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_opaque_response_is_passed_through_uncached() {
        let network = ScriptedNetwork::new().with_response(
            "http://cdn.test/font.woff2",
            0,
            ResponseType::Opaque,
            "",
        );
        let h = harness("v1", network);
        let request = AssetRequest::get(url("http://cdn.test/font.woff2"));

        let (reply, extension) = fetch(&h, request.clone()).await.unwrap();
        extension.settled().await.unwrap();
        match reply {
            Reply::Respond { response, .. } => {
                assert_eq!(response.response_type, ResponseType::Opaque);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let cache = h.storage.open("v1").await.unwrap();
        assert!(cache.keys().await.unwrap().is_empty());
    }

    fn policy_over(
        storage: Arc<dyn CacheStorage>,
        network: ScriptedNetwork,
    ) -> (Arc<CachePolicy>, Arc<WorkerScope>) {
        let scope = Arc::new(WorkerScope::new(
            1,
            url(SCOPE),
            storage,
            Arc::new(network),
            Clients::new(),
        ));
        let config = CachePolicyConfig {
            version: "v1".to_string(),
            ..CachePolicyConfig::default()
        };
        (Arc::new(CachePolicy::new(config, scope.clone())), scope)
    }

    #[tokio::test]
    async fn test_store_write_failure_still_serves_network_response() {
        let storage = Arc::new(ReadOnlyStorage::new("v1"));
        let network = ScriptedNetwork::new().with_asset("http://app.test/main.dart.js", "main()");
        let (policy, _) = policy_over(storage.clone(), network);

        let extension = ExtendableEvent::new();
        let reply = policy
            .on_fetch(AssetRequest::get(url("http://app.test/main.dart.js")), &extension)
            .await
            .unwrap();
        match reply {
            Reply::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Network);
                assert_eq!(response.into_body(), "main()");
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert!(extension.settled().await.is_ok());
        assert_eq!(storage.cache.writes(), 1);
    }

    #[tokio::test]
    async fn test_install_skips_waiting_before_population_finishes() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = shell_network().with_delay(Duration::from_millis(50));
        let (policy, scope) = policy_over(storage.clone(), network);

        let extension = ExtendableEvent::new();
        policy.on_install(&extension);

        assert!(scope.skip_waiting_requested());
        assert_eq!(extension.pending(), 1);
        assert_eq!(storage.stats().await.unwrap().entries, 0);

        extension.settled().await.unwrap();
        let cache = storage.open("v1").await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 3);
    }
}
