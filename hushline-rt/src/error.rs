//! Error types for hushline-rt
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Nothing in here is ever returned from the audio callback: real-time operations
//! report failure through `bool` returns and statistics counters instead.

use crate::engine::EngineError;
use thiserror::Error;

/// Main error type for hushline-rt
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine load or processing errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Model cache lookup errors
    #[error("Model cache error: {0}")]
    Cache(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV read/write errors
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Control channel closed (controller task gone)
    #[error("Control channel closed")]
    ChannelClosed,

    /// Errors bubbled up from the common crate
    #[error(transparent)]
    Common(#[from] hushline_common::Error),
}

/// Convenience Result type using hushline-rt Error
pub type Result<T> = std::result::Result<T, Error>;
