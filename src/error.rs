//! Error types
//!
//! Steady-state simulation never fails; these cover cancellation, worker
//! plumbing and configuration loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Scoring cancelled")]
    Cancelled,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
