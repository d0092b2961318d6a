use crate::error::{ProxyError, Result};
use shell_cache::{
    CachePolicyConfig, DEFAULT_CACHE_VERSION, DEFAULT_CORE_FILES, DEFAULT_FALLBACK_PATH,
};
use std::env;
use std::path::PathBuf;
use url::Url;

/// Where named stores are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Persistent directory under `CACHE_DIR`
    File,
    /// Process memory; gone on restart
    Memory,
}

/// Proxy configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Origin serving the application; also the scope core files resolve against
    pub origin_url: Url,
    pub policy: CachePolicyConfig,
    pub cache_dir: PathBuf,
    pub backend: CacheBackend,
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(3005);

        let origin = lookup("ORIGIN_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        let mut origin_url = Url::parse(&origin)
            .map_err(|e| ProxyError::Config(format!("invalid ORIGIN_URL {}: {}", origin, e)))?;
        // Relative core paths resolve inside the origin's directory
        if !origin_url.path().ends_with('/') {
            let path = format!("{}/", origin_url.path());
            origin_url.set_path(&path);
        }

        let version = lookup("CACHE_VERSION").unwrap_or_else(|| DEFAULT_CACHE_VERSION.to_string());
        if version.trim().is_empty() {
            return Err(ProxyError::Config("CACHE_VERSION must not be empty".to_string()));
        }

        let core_files: Vec<String> = lookup("CORE_FILES")
            .map(|s| {
                s.split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_CORE_FILES.iter().map(|f| f.to_string()).collect());

        let fallback_path =
            lookup("FALLBACK_PATH").unwrap_or_else(|| DEFAULT_FALLBACK_PATH.to_string());

        let cache_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./cache/shell"));

        let backend = match lookup("CACHE_BACKEND").as_deref() {
            None | Some("file") => CacheBackend::File,
            Some("memory") => CacheBackend::Memory,
            Some(other) => {
                return Err(ProxyError::Config(format!(
                    "unknown CACHE_BACKEND {} (expected file or memory)",
                    other
                )))
            }
        };

        Ok(Self {
            port,
            origin_url,
            policy: CachePolicyConfig {
                version,
                core_files,
                fallback_path,
            },
            cache_dir,
            backend,
        })
    }
}
