//! Denoising engine boundary
//!
//! The neural engine is opaque: given model bytes it produces a handle that maps
//! one fixed-length frame to another. Everything here is the seam the pipeline
//! calls through; the pipeline never looks inside.

pub mod builtin;

pub use builtin::{BuiltinLoader, ExpanderEngine, ModelDescriptor, PassthroughEngine};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

/// Errors raised across the engine boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Model could not be turned into an engine
    #[error("Engine load failed: {0}")]
    LoadFailed(String),

    /// Model bytes are malformed
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// One frame failed; the pipeline emits raw input for it and carries on
    #[error("Frame processing failed: {0}")]
    ProcessFailed(String),

    /// Caller passed a frame of the wrong size
    #[error("Frame length mismatch: expected {expected}, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },
}

/// A loaded denoising engine
///
/// `process` must be synchronous and bounded in latency. Dropping the engine
/// releases its handle.
pub trait DenoiseEngine: Send {
    /// Samples per frame; fixed for the lifetime of the engine
    fn frame_length(&self) -> usize;

    /// Denoise one frame. `input` and `output` are both `frame_length()` long.
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineError>;

    /// Maximum attenuation applied to noise, in dB
    fn set_attenuation_limit(&mut self, db: f32);

    /// Post-filter strength
    fn set_post_filter_beta(&mut self, beta: f32);
}

/// Turns a model blob into a running engine
///
/// Called on the blocking pool, never on the audio thread.
pub trait EngineLoader: Send + Sync {
    fn load(
        &self,
        model_bytes: &[u8],
        attenuation_limit_db: f32,
    ) -> Result<Box<dyn DenoiseEngine>, EngineError>;
}

/// Lock-free parameter mailbox between the controller and the engine owner
///
/// The controller stores new values and bumps the generation; whichever thread
/// owns the engine compares generations at each frame boundary and forwards
/// changes. f32 values are stored as their bit patterns.
#[derive(Debug)]
pub struct EngineParams {
    attenuation_limit_db: AtomicU32,
    post_filter_beta: AtomicU32,
    generation: AtomicU64,
}

/// Plain copy of the current engine parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParameters {
    pub attenuation_limit_db: f32,
    pub post_filter_beta: f32,
}

impl EngineParams {
    pub fn new(attenuation_limit_db: f32, post_filter_beta: f32) -> Self {
        Self {
            attenuation_limit_db: AtomicU32::new(attenuation_limit_db.to_bits()),
            post_filter_beta: AtomicU32::new(post_filter_beta.to_bits()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn set_attenuation_limit(&self, db: f32) {
        self.attenuation_limit_db.store(db.to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn set_post_filter_beta(&self, beta: f32) {
        self.post_filter_beta.store(beta.to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self) -> EngineParameters {
        EngineParameters {
            attenuation_limit_db: f32::from_bits(self.attenuation_limit_db.load(Ordering::Relaxed)),
            post_filter_beta: f32::from_bits(self.post_filter_beta.load(Ordering::Relaxed)),
        }
    }

    /// Forward pending changes to `engine` if the generation moved since `seen`
    ///
    /// Real-time safe: two atomic loads and, on change, two setter calls.
    pub fn apply_if_changed(&self, seen: &mut u64, engine: &mut dyn DenoiseEngine) {
        let current = self.generation();
        if current != *seen {
            let params = self.get();
            engine.set_attenuation_limit(params.attenuation_limit_db);
            engine.set_post_filter_beta(params.post_filter_beta);
            *seen = current;
        }
    }
}
