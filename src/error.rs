//! Error types for pylsd

use thiserror::Error;

/// Main error type for pylsd operations
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("invalid params: {message}")]
    InvalidParams { message: String },

    #[error("failed to load extension: {message}")]
    ExtensionLoad { message: String },

    #[error("unable to extract archive because the workspace has no rootUri")]
    MissingWorkspaceRoot,

    #[error("download failed: {message}")]
    Download { message: String },

    #[error("archive error: {message}")]
    Archive { message: String },

    #[error("command failed: {message}")]
    Command { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pylsd operations
pub type Result<T> = std::result::Result<T, ServerError>;
