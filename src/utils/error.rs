//! Error types for the emotion training pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by dataset loading, training, evaluation and export
#[derive(Error, Debug)]
pub enum EmotionError {
    /// An image could not be opened or decoded
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for EmotionError {
    fn from(err: serde_json::Error) -> Self {
        EmotionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EmotionError {
    fn from(err: toml::de::Error) -> Self {
        EmotionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EmotionError {
    fn from(err: toml::ser::Error) -> Self {
        EmotionError::Serialization(err.to_string())
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, EmotionError>;

/// Attach a message to foreign errors and empty options
pub trait ResultExt<T> {
    fn context(self, msg: &str) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| EmotionError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| EmotionError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| EmotionError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| EmotionError::InvalidInput(f()))
    }
}
