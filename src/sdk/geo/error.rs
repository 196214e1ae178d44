use serde::Deserialize;
use thiserror::Error;

// Structured error body some geocoding providers return on non-2xx.
#[derive(Deserialize, Debug)]
pub struct ProviderErrorDetail {
    pub code: u32,
    pub message: String,
}
#[derive(Deserialize, Debug)]
pub struct ProviderErrorPayload {
    pub error: ProviderErrorDetail,
}

/// Failures inside a tier. The resolver logs these and degrades; they never
/// reach its callers.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Provider returned HTTP {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: u32,
        message: String,
    },

    // Non-2xx whose body is not the structured payload above
    #[error("Provider returned HTTP {status}: {body}")]
    RawApi { status: u16, body: String },

    #[error("Underlying request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Distributed cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Write-back queue is closed")]
    QueueClosed,
}

/// Caller errors, rejected before any tier is consulted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Origin ({lat}, {lng}) is outside the valid coordinate range")]
    InvalidOrigin { lat: f64, lng: f64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
