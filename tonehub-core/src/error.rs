use std::path::PathBuf;

use thiserror::Error;
use tonehub_model::ModelError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to extract metadata from {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("No mime type known for {0}")]
    UnknownMimeType(PathBuf),

    #[error("Invalid model value: {0}")]
    Model(#[from] ModelError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Filesystem watch error: {0}")]
    Watch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IndexError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Cancellation ends work early but is not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IndexError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
