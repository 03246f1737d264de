//! Inventory Error Types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the inventory service
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Client is missing its base URL or API key
    #[error("Inventory client not configured: {0}")]
    NotConfigured(String),

    /// Transport-level failure (connect, TLS, reset)
    #[error("Inventory request failed: {0}")]
    Http(String),

    /// Non-success HTTP status
    #[error("Inventory returned status {status} for {path}")]
    Status { status: u16, path: String },

    /// Call exceeded its time budget
    #[error("Inventory call timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be decoded
    #[error("Malformed inventory response: {0}")]
    Decode(String),
}

impl InventoryError {
    /// Whether the error means the service could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            InventoryError::Http(_) | InventoryError::Timeout(_) | InventoryError::Status { .. }
        )
    }
}

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            InventoryError::Decode(err.to_string())
        } else {
            InventoryError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for InventoryError {
    fn from(err: serde_json::Error) -> Self {
        InventoryError::Decode(err.to_string())
    }
}
