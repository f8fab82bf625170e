//! Lock-free view of the pipeline state
//!
//! The controller is the only writer. The audio thread reads it once per tick to
//! decide between processing and passthrough.

use hushline_common::PipelineState;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug)]
pub struct AtomicPipelineState(AtomicU8);

impl AtomicPipelineState {
    pub fn new(state: PipelineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for AtomicPipelineState {
    fn default() -> Self {
        Self::new(PipelineState::Uninitialized)
    }
}
