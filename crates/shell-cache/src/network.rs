//! Real network access for requests that miss the cache

use crate::error::NetworkError;
use crate::types::{AssetRequest, AssetResponse, ResponseType};
use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::debug;
use url::{Origin, Url};

/// Request headers that belong to a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// Performs a real request for an intercepted one
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError>;
}

/// HTTP client bound to the application origin
pub struct HttpNetwork {
    client: Client,
    origin: Origin,
}

impl HttpNetwork {
    /// Create a network for the application served from `origin_url`
    pub fn new(origin_url: &Url) -> Result<Self, NetworkError> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, origin_url))
    }

    pub fn with_client(client: Client, origin_url: &Url) -> Self {
        Self {
            client,
            origin: origin_url.origin(),
        }
    }

    /// Classify a response the way a browser would for this origin.
    ///
    /// `response_url` is where the response came from after redirects.
    fn classify(&self, response_url: &Url, headers: &[(String, String)]) -> ResponseType {
        if response_url.origin() == self.origin {
            ResponseType::Basic
        } else if headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case("access-control-allow-origin"))
        {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }
}

/// Whether a header is scoped to a single connection
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| NetworkError::InvalidMethod(request.method.clone()))?;

        debug!(method = %request.method, url = %request.url, "Fetching from network");

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let response_type = self.classify(&final_url, &headers);
        if response_type == ResponseType::Opaque {
            debug!(url = %request.url, final_url = %final_url, "Cross-origin response is opaque");
            return Ok(AssetResponse::opaque());
        }

        let body = response.bytes().await?;
        debug!(url = %request.url, status, size = body.len(), "Fetched from network");

        let mut asset = AssetResponse::new(status, response_type, body).with_url(final_url);
        asset.headers = headers;
        Ok(asset)
    }
}
