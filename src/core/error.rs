//! Error types for the voxel cone tracing subsystem

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("GPU capability error: {0}")]
    Capability(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Voxel error: {0}")]
    Voxel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
