//! Core types for the shell cache

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Name of the cache generation shipped with the current shell
pub const DEFAULT_CACHE_VERSION: &str = "weatherly-shell-v1";

/// Assets needed to render the shell offline
pub const DEFAULT_CORE_FILES: [&str; 3] = ["index.html", "manifest.json", "flutter_bootstrap.js"];

/// Document served when the network is unreachable
pub const DEFAULT_FALLBACK_PATH: &str = "index.html";

/// An intercepted outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl AssetRequest {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Identity of the request inside a named store: method plus URL without fragment
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

/// How a response relates to the origin that requested it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response, fully readable
    Basic,
    /// Cross-origin response allowed by the remote server
    Cors,
    /// Cross-origin response with status and body hidden
    Opaque,
    Error,
}

/// A response whose body can be consumed once.
///
/// Not `Clone`: code that needs to both return and
/// persist a response calls [`AssetResponse::duplicate`] before consuming it.
#[derive(Debug)]
pub struct AssetResponse {
    pub status: u16,
    pub response_type: ResponseType,
    pub url: Option<Url>,
    pub headers: Vec<(String, String)>,
    body: Bytes,
}

impl AssetResponse {
    pub fn new(status: u16, response_type: ResponseType, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            response_type,
            url: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Same-origin response
    pub fn basic(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, ResponseType::Basic, body)
    }

    /// Cross-origin response with everything filtered out
    pub fn opaque() -> Self {
        Self::new(0, ResponseType::Opaque, Bytes::new())
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Only successful same-origin responses are written to the store
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type == ResponseType::Basic
    }

    /// Independent copy that can be consumed separately from `self`
    pub fn duplicate(&self) -> Self {
        Self {
            status: self.status,
            response_type: self.response_type,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// Consume the response and take its body
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Consume the response into its parts
    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// Where a fetch response handed back to the caller came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Cache,
    /// Fetched and queued for storage
    Network,
    /// Fetched but not eligible for storage
    NetworkUncached,
    /// Offline shell document
    Fallback,
}

impl ResponseSource {
    /// Value for the `X-Cache` response header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "HIT",
            ResponseSource::Network | ResponseSource::NetworkUncached => "MISS",
            ResponseSource::Fallback => "FALLBACK",
        }
    }
}

/// Tunable parameters of the interception policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicyConfig {
    /// Name of the live cache generation; changing it invalidates every older one
    pub version: String,
    pub core_files: Vec<String>,
    pub fallback_path: String,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_CACHE_VERSION.to_string(),
            core_files: DEFAULT_CORE_FILES.iter().map(|s| s.to_string()).collect(),
            fallback_path: DEFAULT_FALLBACK_PATH.to_string(),
        }
    }
}

/// Metadata for a persisted cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub response_type: ResponseType,
    pub response_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the named stores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub stores: usize,
    pub entries: usize,
    pub total_size: u64,
}
