//! Error types for the shell cache

use std::fmt;

/// Errors raised by a named cache store
#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    Serialization(serde_json::Error),
    /// Only GET requests can be stored
    UnsupportedMethod(String),
    /// A bulk population fetch did not reach the network
    Network(NetworkError),
    /// A bulk population fetch came back with a non-ok status
    BadResponse { url: String, status: u16 },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "Cache IO error: {}", err),
            CacheError::Serialization(err) => write!(f, "Cache metadata error: {}", err),
            CacheError::UnsupportedMethod(method) => {
                write!(f, "Cannot cache a {} request", method)
            }
            CacheError::Network(err) => write!(f, "Cache population failed: {}", err),
            CacheError::BadResponse { url, status } => {
                write!(f, "Cache population failed: {} returned status {}", url, status)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Serialization(err) => Some(err),
            CacheError::Network(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err)
    }
}

impl From<NetworkError> for CacheError {
    fn from(err: NetworkError) -> Self {
        CacheError::Network(err)
    }
}

/// Errors raised while performing a real network request
#[derive(Debug)]
pub enum NetworkError {
    Http(Box<reqwest::Error>),
    InvalidMethod(String),
    /// Returned by fakes and by callers that simulate a dropped connection
    Unreachable(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Http(err) => write!(f, "HTTP error: {}", err),
            NetworkError::InvalidMethod(method) => write!(f, "Invalid HTTP method: {}", method),
            NetworkError::Unreachable(url) => write!(f, "Network unreachable: {}", url),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Http(Box::new(err))
    }
}

/// Errors surfaced by the interception policy and its lifecycle
#[derive(Debug)]
pub enum PolicyError {
    Cache(CacheError),
    Network(NetworkError),
    /// The network failed and no shell document was cached
    Offline { url: String, source: NetworkError },
    InvalidPath(String),
    /// A handler task panicked or was cancelled
    Handler(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Cache(err) => write!(f, "{}", err),
            PolicyError::Network(err) => write!(f, "{}", err),
            PolicyError::Offline { url, source } => {
                write!(f, "Failed to fetch {} and no offline shell is cached: {}", url, source)
            }
            PolicyError::InvalidPath(msg) => write!(f, "Invalid asset path: {}", msg),
            PolicyError::Handler(msg) => write!(f, "Event handler failed: {}", msg),
        }
    }
}

impl std::error::Error for PolicyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PolicyError::Cache(err) => Some(err),
            PolicyError::Network(err) => Some(err),
            PolicyError::Offline { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<CacheError> for PolicyError {
    fn from(err: CacheError) -> Self {
        PolicyError::Cache(err)
    }
}

impl From<NetworkError> for PolicyError {
    fn from(err: NetworkError) -> Self {
        PolicyError::Network(err)
    }
}

impl From<url::ParseError> for PolicyError {
    fn from(err: url::ParseError) -> Self {
        PolicyError::InvalidPath(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
