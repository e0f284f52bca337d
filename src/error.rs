use std::time::Duration;

use thiserror::Error;

use crate::types::JobStatus;

/// Errors returned by generation operations.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The request was rejected before a job was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The prompt hit the local denylist or the upstream moderation marker.
    #[error("Blocked due to sensitive content: {0}")]
    BlockedContent(String),

    /// The liveness probe did not land on the creation page.
    #[error("Credential rejected by the creation service")]
    CredentialInvalid,

    /// No image links appeared before the poll deadline.
    #[error("Timed out after {0:?} waiting for images")]
    PollTimeout(Duration),

    /// The fallback page scrape found nothing usable.
    #[error("No images found in response")]
    NoImagesFound,

    /// A single image could not be fetched or written.
    #[error("Download failed: {0}")]
    Download(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// Failure reported by a non-reqwest transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A job was asked to move backwards through its lifecycle.
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    /// Short reason recorded on a failed job or style.
    pub fn reason(&self) -> String {
        match self {
            GenerationError::BlockedContent(term) => {
                format!("blocked: sensitive content ({})", term)
            }
            GenerationError::CredentialInvalid => "credential invalid".to_string(),
            GenerationError::PollTimeout(_) => "timed out waiting for images".to_string(),
            GenerationError::NoImagesFound => "no images found".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        GenerationError::Other(format!("{:#}", err))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GenerationError>;
