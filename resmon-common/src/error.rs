use thiserror::Error;

/// Common error type for resmon components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bus message: {0}")]
    Message(String),
}

/// Result type alias using resmon's Error.
pub type Result<T> = std::result::Result<T, Error>;
