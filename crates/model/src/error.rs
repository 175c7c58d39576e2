use attention::AttentionError;
use thiserror::Error;

/// Errors raised while configuring, building, loading or saving a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model configuration: {0}")]
    Config(String),
    #[error("invalid batch: {0}")]
    Batch(String),
    #[error("decoder state: {0}")]
    State(String),
    #[error("checkpoint {path}: {message}")]
    Checkpoint { path: String, message: String },
    #[error("capacity exhausted: {0}")]
    Capacity(String),
    #[error("attention: {0}")]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl ModelError {
    pub fn config(message: impl Into<String>) -> Self {
        ModelError::Config(message.into())
    }

    pub fn batch(message: impl Into<String>) -> Self {
        ModelError::Batch(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        ModelError::State(message.into())
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        ModelError::Capacity(message.into())
    }

    pub fn checkpoint(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        ModelError::Checkpoint {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
