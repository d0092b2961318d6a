//! Offline-first caching policy for a single web application's shell
//!
//! Intercepts requests for the application's static assets, answers them
//! from a versioned named store and falls back to the network, storing
//! successful same-origin responses along the way. Bumping the cache
//! version is the only way to invalidate what was stored before.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod policy;
pub mod scope;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use dispatch::{Dispatched, Dispatcher, Event, EventKind, ExtendableEvent, Reply};
pub use error::{CacheError, NetworkError, PolicyError, Result};
pub use lifecycle::{Registration, WorkerInfo, WorkerState};
pub use network::{is_hop_by_hop, HttpNetwork, Network};
pub use policy::CachePolicy;
pub use scope::{ClientId, Clients, WorkerId, WorkerScope};
pub use store::{
    add_all, CacheStorage, FileCache, FileCacheStorage, MemoryCache, MemoryCacheStorage,
    NamedCache,
};
pub use types::{
    AssetRequest, AssetResponse, CacheEntry, CachePolicyConfig, CacheStats, ResponseSource,
    ResponseType, DEFAULT_CACHE_VERSION, DEFAULT_CORE_FILES, DEFAULT_FALLBACK_PATH,
};
