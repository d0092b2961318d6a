//! Error types for the shell cache proxy

use shell_cache::{CacheError, NetworkError, PolicyError};
use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    Cache(CacheError),
    Network(NetworkError),
    Policy(PolicyError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Cache(err) => write!(f, "Cache error: {}", err),
            ProxyError::Network(err) => write!(f, "Network error: {}", err),
            ProxyError::Policy(err) => write!(f, "Policy error: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Cache(err) => Some(err),
            ProxyError::Network(err) => Some(err),
            ProxyError::Policy(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            ProxyError::Config(_) => None,
        }
    }
}

impl From<CacheError> for ProxyError {
    fn from(err: CacheError) -> Self {
        ProxyError::Cache(err)
    }
}

impl From<NetworkError> for ProxyError {
    fn from(err: NetworkError) -> Self {
        ProxyError::Network(err)
    }
}

impl From<PolicyError> for ProxyError {
    fn from(err: PolicyError) -> Self {
        ProxyError::Policy(err)
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
