//! Real-time side of the pipeline
//!
//! `RealtimeProcessor::process` is the audio callback body. Per tick it:
//! 1. Applies pending chain commands from the controller (attach/detach)
//! 2. Copies input to output unless the pipeline is Processing with a chain attached
//! 3. Otherwise feeds the assembler, moves frames through the engine route,
//!    smooths engine output into the playback drain and drains one block
//!
//! Nothing here allocates (beyond the assembler's documented growth path),
//! blocks, or logs. Failures become counters in `PipelineStats`.

use super::assembler::FrameAssembler;
use super::drain::PlaybackDrain;
use super::frame_ring::{FrameConsumer, FrameProducer};
use super::smoother::OutputSmoother;
use super::stats::PipelineStats;
use super::PipelineShared;
use crate::engine::{DenoiseEngine, EngineParams};
use hushline_common::{PipelineState, Topology};
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapProd};
use std::sync::Arc;

/// Controller -> audio thread
pub enum ProcessorCommand {
    /// Install a new chain; the previous one (if any) is sent back for reclamation
    Attach(Box<ProcessingChain>),
    /// Remove the current chain
    Detach,
}

/// Where engine frames are computed
pub enum EngineRoute {
    /// Engine called inside the audio callback
    InThread {
        engine: Box<dyn DenoiseEngine>,
        /// Last parameter generation forwarded to the engine
        params_seen: u64,
    },
    /// Engine runs on the denoise worker; only the ring ends live here
    Worker {
        input: FrameProducer,
        output: FrameConsumer,
    },
}

/// Everything sized by the engine frame length, built off the audio thread
pub struct ProcessingChain {
    assembler: FrameAssembler,
    smoother: OutputSmoother,
    drain: PlaybackDrain,
    frame_in: Box<[f32]>,
    frame_out: Box<[f32]>,
    route: EngineRoute,
}

impl ProcessingChain {
    pub fn new(
        frame_length: usize,
        assembler: FrameAssembler,
        smoother: OutputSmoother,
        drain: PlaybackDrain,
        route: EngineRoute,
    ) -> Self {
        Self {
            assembler,
            smoother,
            drain,
            frame_in: vec![0.0; frame_length].into_boxed_slice(),
            frame_out: vec![0.0; frame_length].into_boxed_slice(),
            route,
        }
    }

    pub fn frame_length(&self) -> usize {
        self.frame_in.len()
    }

    pub fn topology(&self) -> Topology {
        match self.route {
            EngineRoute::InThread { .. } => Topology::InThread,
            EngineRoute::Worker { .. } => Topology::Worker,
        }
    }

    /// Forget buffered audio before (re)entering Processing
    fn reset(&mut self, previous_tail: f32) {
        self.assembler.clear();
        self.drain.clear();
        self.smoother.set_previous_tail(previous_tail);
        if let EngineRoute::Worker { output, .. } = &mut self.route {
            output.discard_all();
        }
    }

    fn run(&mut self, input: &[f32], output: &mut [f32], stats: &PipelineStats, params: &EngineParams) {
        let ProcessingChain {
            assembler,
            smoother,
            drain,
            frame_in,
            frame_out,
            route,
        } = self;

        assembler.push(input);

        match route {
            EngineRoute::InThread { engine, params_seen } => {
                while assembler.pop_frame(frame_in) {
                    stats.record_submitted();
                    params.apply_if_changed(params_seen, engine.as_mut());
                    match engine.process(frame_in, frame_out) {
                        Ok(()) => stats.record_processed(),
                        Err(_) => {
                            frame_out.copy_from_slice(frame_in);
                            stats.record_failure();
                        }
                    }
                    emit_frame(smoother, drain, frame_out, stats);
                }
            }
            EngineRoute::Worker {
                input: to_worker,
                output: from_worker,
            } => {
                while assembler.pop_frame(frame_in) {
                    if to_worker.push(frame_in) {
                        stats.record_submitted();
                    } else {
                        // Oldest frames belong to the worker's end; drop the new one
                        stats.record_overrun();
                    }
                }
                while from_worker.pop(frame_out) {
                    emit_frame(smoother, drain, frame_out, stats);
                }
            }
        }

        if drain.drain_into(output, input) {
            stats.record_underrun();
        }
    }
}

fn emit_frame(smoother: &mut OutputSmoother, drain: &mut PlaybackDrain, frame: &mut [f32], stats: &PipelineStats) {
    if smoother.apply(frame) {
        stats.record_declick();
    }
    let dropped = drain.push_frame(frame);
    if dropped > 0 {
        stats.record_drop(dropped);
    }
}

/// Audio-thread half of a pipeline
pub struct RealtimeProcessor {
    shared: Arc<PipelineShared>,
    commands: HeapCons<ProcessorCommand>,
    reclaim: HeapProd<Box<ProcessingChain>>,
    chain: Option<Box<ProcessingChain>>,
    was_processing: bool,
    last_sample: f32,
}

impl RealtimeProcessor {
    pub(crate) fn new(
        shared: Arc<PipelineShared>,
        commands: HeapCons<ProcessorCommand>,
        reclaim: HeapProd<Box<ProcessingChain>>,
    ) -> Self {
        Self {
            shared,
            commands,
            reclaim,
            chain: None,
            was_processing: false,
            last_sample: 0.0,
        }
    }

    /// Process one host block
    ///
    /// `output` receives `min(input.len(), output.len())` samples; any extra
    /// output is zeroed. Works for any block size.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.apply_commands();

        let n = input.len().min(output.len());
        let input = &input[..n];
        let (output, tail) = output.split_at_mut(n);
        for sample in tail.iter_mut() {
            *sample = 0.0;
        }

        let processing = self.shared.state.load() == PipelineState::Processing;
        match self.chain.as_mut() {
            Some(chain) if processing => {
                if !self.was_processing {
                    chain.reset(self.last_sample);
                    self.was_processing = true;
                }
                chain.run(input, output, &self.shared.stats, &self.shared.params);
            }
            _ => {
                output.copy_from_slice(input);
                self.was_processing = false;
            }
        }

        if let Some(&last) = output.last() {
            self.last_sample = last;
        }
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            let previous = match command {
                ProcessorCommand::Attach(chain) => self.chain.replace(chain),
                ProcessorCommand::Detach => self.chain.take(),
            };
            self.was_processing = false;
            if let Some(old) = previous {
                // A full reclaim queue means the controller is gone; dropping here is the only option
                let _ = self.reclaim.try_push(old);
            }
        }
    }

    /// Whether a chain is currently installed
    pub fn has_chain(&self) -> bool {
        self.chain.is_some()
    }

    /// Frame length of the installed chain
    pub fn frame_length(&self) -> Option<usize> {
        self.chain.as_ref().map(|c| c.frame_length())
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.load()
    }
}
