//! hushline-rt: real-time noise-suppression pipeline
//!
//! Sits between an audio source and sink, cuts the host's arbitrary blocks
//! into engine frames, runs an opaque denoising engine either inside the audio
//! callback or on a worker thread, and smooths the result back into host
//! blocks. Every failure path degrades to passthrough; audio never stops.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod offline;
pub mod pipeline;

pub use cache::{DirectoryFetcher, ModelCache, ModelFetcher};
pub use config::{LoggingConfig, PipelineConfig, TomlConfig};
pub use engine::{BuiltinLoader, DenoiseEngine, EngineError, EngineLoader, EngineParameters};
pub use error::{Error, Result};
pub use pipeline::{PipelineBuilder, PipelineController, PipelineHandle, RealtimeProcessor};
