// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// DevTools websocket failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Screenshot payload was not valid base64
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subject directory could not be loaded
    #[error("Subject directory error: {0}")]
    Subjects(String),

    /// Feed connection or decoding failed
    #[error("Stream error: {0}")]
    Stream(String),

    /// Page renderer failed
    #[error("Render error during {step}: {message}")]
    Render { step: String, message: String },

    /// Publisher rejected a request
    #[error("Publish error: {0}")]
    Publish(String),

    /// An operation ran out of time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a subject directory error.
    pub fn subjects(message: impl Into<String>) -> Self {
        Self::Subjects(message.into())
    }

    /// Create a feed stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// Create a renderer error for the given step.
    pub fn render(step: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Render {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Create a publisher error.
    pub fn publish(message: impl fmt::Display) -> Self {
        Self::Publish(message.to_string())
    }
}
