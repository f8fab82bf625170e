//! Built-in reference engines
//!
//! These stand in for a neural model when none is available (CLI runs, tests).
//! The "model bytes" are a small TOML descriptor:
//!
//! ```toml
//! kind = "expander"
//! frame_length = 480
//! threshold_db = -45.0
//! ratio = 2.0
//! ```

use super::{DenoiseEngine, EngineError, EngineLoader};
use serde::Deserialize;
use tracing::{debug, info};

/// Frame length used when the descriptor does not specify one (10 ms @ 48 kHz)
pub const DEFAULT_FRAME_LENGTH: usize = 480;

/// Which reference engine to build
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Passthrough,
    Expander,
}

/// Parsed model descriptor
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub kind: EngineKind,

    #[serde(default = "default_frame_length")]
    pub frame_length: usize,

    /// Frames quieter than this (RMS, dBFS) are attenuated
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,

    /// Downward expansion ratio below the threshold
    #[serde(default = "default_ratio")]
    pub ratio: f32,
}

fn default_frame_length() -> usize {
    DEFAULT_FRAME_LENGTH
}

fn default_threshold_db() -> f32 {
    -45.0
}

fn default_ratio() -> f32 {
    2.0
}

impl ModelDescriptor {
    /// Parse descriptor bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| EngineError::InvalidModel(format!("descriptor is not UTF-8: {}", e)))?;
        let descriptor: ModelDescriptor = toml::from_str(text)
            .map_err(|e| EngineError::InvalidModel(format!("descriptor parse failed: {}", e)))?;

        if descriptor.frame_length == 0 {
            return Err(EngineError::InvalidModel("frame_length must be > 0".to_string()));
        }
        if !(descriptor.ratio.is_finite() && descriptor.ratio >= 1.0) {
            return Err(EngineError::InvalidModel(format!(
                "ratio must be >= 1 (got {})",
                descriptor.ratio
            )));
        }
        Ok(descriptor)
    }

    /// Descriptor bytes for a passthrough engine of the given frame length
    pub fn passthrough_bytes(frame_length: usize) -> Vec<u8> {
        format!("kind = \"passthrough\"\nframe_length = {}\n", frame_length).into_bytes()
    }
}

/// Loader for the reference engines
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLoader;

impl EngineLoader for BuiltinLoader {
    fn load(
        &self,
        model_bytes: &[u8],
        attenuation_limit_db: f32,
    ) -> Result<Box<dyn DenoiseEngine>, EngineError> {
        if model_bytes.is_empty() {
            return Err(EngineError::LoadFailed("empty model".to_string()));
        }

        let descriptor = ModelDescriptor::parse(model_bytes)?;
        info!(
            "Loading built-in {:?} engine: frame_length={}, attenuation_limit={:.1}dB",
            descriptor.kind, descriptor.frame_length, attenuation_limit_db
        );

        let engine: Box<dyn DenoiseEngine> = match descriptor.kind {
            EngineKind::Passthrough => Box::new(PassthroughEngine::new(descriptor.frame_length)),
            EngineKind::Expander => Box::new(ExpanderEngine::new(
                descriptor.frame_length,
                descriptor.threshold_db,
                descriptor.ratio,
                attenuation_limit_db,
            )),
        };
        Ok(engine)
    }
}

/// Copies input to output
#[derive(Debug)]
pub struct PassthroughEngine {
    frame_length: usize,
}

impl PassthroughEngine {
    pub fn new(frame_length: usize) -> Self {
        Self { frame_length }
    }
}

impl DenoiseEngine for PassthroughEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineError> {
        check_lengths(self.frame_length, input, output)?;
        output.copy_from_slice(input);
        Ok(())
    }

    fn set_attenuation_limit(&mut self, _db: f32) {}

    fn set_post_filter_beta(&mut self, _beta: f32) {}
}

/// Per-frame downward expander
///
/// Frames whose RMS falls below `threshold_db` are attenuated by
/// `(threshold - level) * (ratio - 1)` dB, capped at the attenuation limit.
/// The post-filter beta smooths the gain from frame to frame; inside a frame the
/// gain ramps linearly so there is no step at the boundary.
#[derive(Debug)]
pub struct ExpanderEngine {
    frame_length: usize,
    threshold_db: f32,
    ratio: f32,
    attenuation_limit_db: f32,
    beta: f32,
    gain: f32,
}

impl ExpanderEngine {
    pub fn new(frame_length: usize, threshold_db: f32, ratio: f32, attenuation_limit_db: f32) -> Self {
        Self {
            frame_length,
            threshold_db,
            ratio,
            attenuation_limit_db: attenuation_limit_db.max(0.0),
            beta: 0.0,
            gain: 1.0,
        }
    }

    fn target_gain(&self, input: &[f32]) -> f32 {
        let energy: f32 = input.iter().map(|s| s * s).sum();
        let rms = (energy / input.len().max(1) as f32).sqrt();
        let level_db = 20.0 * rms.max(1e-9).log10();

        if level_db >= self.threshold_db {
            return 1.0;
        }
        let reduction_db = ((self.threshold_db - level_db) * (self.ratio - 1.0)).min(self.attenuation_limit_db);
        10f32.powf(-reduction_db / 20.0)
    }
}

impl DenoiseEngine for ExpanderEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineError> {
        check_lengths(self.frame_length, input, output)?;

        let target = self.target_gain(input);
        let next = self.beta * self.gain + (1.0 - self.beta) * target;
        let step = (next - self.gain) / self.frame_length as f32;

        let mut g = self.gain;
        for (out, &x) in output.iter_mut().zip(input) {
            g += step;
            *out = x * g;
        }
        self.gain = next;
        Ok(())
    }

    fn set_attenuation_limit(&mut self, db: f32) {
        debug!("Expander attenuation limit -> {:.1}dB", db);
        self.attenuation_limit_db = db.max(0.0);
    }

    fn set_post_filter_beta(&mut self, beta: f32) {
        self.beta = beta.clamp(0.0, 0.99);
    }
}

fn check_lengths(expected: usize, input: &[f32], output: &[f32]) -> Result<(), EngineError> {
    if input.len() != expected {
        return Err(EngineError::FrameLengthMismatch {
            expected,
            actual: input.len(),
        });
    }
    if output.len() != expected {
        return Err(EngineError::FrameLengthMismatch {
            expected,
            actual: output.len(),
        });
    }
    Ok(())
}
