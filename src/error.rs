//! Error types for cache operations.
//!
//! Components raise these on real faults. The orchestrators in [`crate::cache`]
//! are the only place they are caught and turned into warnings.

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::CompressionFormat;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    // Configuration errors
    #[error("Input required and not supplied: {0}")]
    MissingInput(&'static str),

    #[error("Invalid action '{0}': expected 'save' or 'restore'")]
    InvalidAction(String),

    // Transport errors
    #[error("{program} exited with {status}: {stderr}")]
    Archiver {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("No {0} compressor available on this machine")]
    CompressorUnavailable(CompressionFormat),

    // Store errors
    #[error("Cache object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object store endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Object store {operation} failed for {key}: {message}")]
    Store {
        operation: &'static str,
        key: String,
        message: String,
    },

    // Manifest errors
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Manifest version {found} does not match expected {expected}")]
    ManifestVersion { expected: String, found: String },

    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CacheError {
    /// Helper for wrapping filesystem errors with the offending path.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Whether this is the expected "object absent" store response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    /// Configuration errors abort before any I/O is attempted.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            CacheError::MissingInput(_) | CacheError::InvalidAction(_)
        )
    }
}
