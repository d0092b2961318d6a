//! Response types for the shell cache proxy

use serde::Serialize;
use shell_cache::{CacheStats, WorkerInfo};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub worker: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    pub cache: CacheStats,
}

/// Error body returned when a request cannot be answered
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
