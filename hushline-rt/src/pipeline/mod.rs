//! Noise-suppression pipeline
//!
//! A pipeline is three cooperating pieces built together by `PipelineBuilder`:
//! - `PipelineController`: async task owning the lifecycle (spawn it on tokio)
//! - `PipelineHandle`: cloneable host-side control channel and read-only views
//! - `RealtimeProcessor`: moved into the audio callback
//!
//! The pieces share one `PipelineShared` (state, statistics, engine parameters),
//! all lock-free.

pub mod assembler;
pub mod controller;
pub mod drain;
pub mod frame_ring;
pub mod processor;
pub mod smoother;
pub mod state;
pub mod stats;
pub mod worker;

pub use assembler::FrameAssembler;
pub use controller::PipelineController;
pub use drain::PlaybackDrain;
pub use frame_ring::{frame_ring, FrameConsumer, FrameProducer, RingSignal};
pub use processor::{ProcessingChain, ProcessorCommand, RealtimeProcessor};
pub use smoother::OutputSmoother;
pub use state::AtomicPipelineState;
pub use stats::PipelineStats;

use crate::cache::ModelCache;
use crate::config::PipelineConfig;
use crate::engine::{BuiltinLoader, EngineLoader, EngineParameters, EngineParams};
use crate::error::{Error, Result};
use hushline_common::{ControlMessage, EventBus, ModelSource, PipelineEvent, PipelineState, StatsSnapshot};
use ringbuf::traits::*;
use ringbuf::HeapRb;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Chain attach/detach commands that can be queued while the audio callback is idle
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// State shared by controller, audio thread and worker
#[derive(Debug)]
pub struct PipelineShared {
    pub pipeline_id: Uuid,
    pub state: AtomicPipelineState,
    pub stats: PipelineStats,
    pub params: EngineParams,
}

impl PipelineShared {
    pub fn new(attenuation_limit_db: f32, post_filter_beta: f32) -> Self {
        Self {
            pipeline_id: Uuid::new_v4(),
            state: AtomicPipelineState::default(),
            stats: PipelineStats::new(),
            params: EngineParams::new(attenuation_limit_db, post_filter_beta),
        }
    }
}

/// Assembles a pipeline
pub struct PipelineBuilder {
    config: PipelineConfig,
    loader: Option<Arc<dyn EngineLoader>>,
    model_cache: Option<Arc<ModelCache>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            loader: None,
            model_cache: None,
        }
    }

    /// Engine loader (defaults to the built-in reference engines)
    pub fn loader(mut self, loader: Arc<dyn EngineLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Cache used to resolve `ModelSource::Cached`
    pub fn model_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.model_cache = Some(cache);
        self
    }

    /// Build the three pipeline pieces without starting anything
    pub fn build(self) -> Result<(PipelineController, PipelineHandle, RealtimeProcessor)> {
        self.config.validate()?;

        let shared = Arc::new(PipelineShared::new(100.0, self.config.default_post_filter_beta));
        let (control_tx, control_rx) = mpsc::channel(self.config.control_queue_size);
        let events = EventBus::new(self.config.event_capacity);

        let (command_tx, command_rx) = HeapRb::<ProcessorCommand>::new(COMMAND_QUEUE_CAPACITY).split();
        // Every queued Attach can come back, plus the chain currently installed
        let (reclaim_tx, reclaim_rx) =
            HeapRb::<Box<ProcessingChain>>::new(COMMAND_QUEUE_CAPACITY + 1).split();

        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(BuiltinLoader) as Arc<dyn EngineLoader>);

        let controller = PipelineController::new(
            self.config,
            Arc::clone(&shared),
            control_rx,
            command_tx,
            reclaim_rx,
            loader,
            self.model_cache,
            events.clone(),
        );
        let handle = PipelineHandle {
            tx: control_tx,
            shared: Arc::clone(&shared),
            events,
        };
        let processor = RealtimeProcessor::new(shared, command_rx, reclaim_tx);

        Ok((controller, handle, processor))
    }

    /// Build and spawn the controller on the current tokio runtime
    pub fn spawn(self) -> Result<(PipelineHandle, RealtimeProcessor, JoinHandle<()>)> {
        let (controller, handle, processor) = self.build()?;
        let task = tokio::spawn(controller.run());
        Ok((handle, processor, task))
    }
}

/// Host-side handle: sends control messages and observes the pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<ControlMessage>,
    shared: Arc<PipelineShared>,
    events: EventBus,
}

impl PipelineHandle {
    pub async fn send(&self, message: ControlMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| Error::ChannelClosed)
    }

    /// Non-blocking send, for callers outside async context
    pub fn try_send(&self, message: ControlMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::InvalidState("control queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }

    pub async fn init(&self, model: ModelSource, attenuation_limit_db: f32) -> Result<()> {
        self.send(ControlMessage::Init {
            model,
            attenuation_limit_db,
        })
        .await
    }

    pub async fn update_params(
        &self,
        attenuation_limit_db: Option<f32>,
        post_filter_beta: Option<f32>,
    ) -> Result<()> {
        self.send(ControlMessage::UpdateParams {
            attenuation_limit_db,
            post_filter_beta,
        })
        .await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ControlMessage::SetEnabled { enabled }).await
    }

    pub async fn reset_stats(&self) -> Result<()> {
        self.send(ControlMessage::ResetStats).await
    }

    /// Stop processing for good
    ///
    /// The controller stops and joins the worker. The chain itself (and an
    /// in-thread engine) is handed back on the next `RealtimeProcessor::process`
    /// call, so a host that stops its stream first keeps the engine alive until
    /// the processor is dropped.
    pub async fn dispose(&self) -> Result<()> {
        self.send(ControlMessage::Dispose).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.load()
    }

    /// Engine parameters as last accepted by the controller
    pub fn parameters(&self) -> EngineParameters {
        self.shared.params.get()
    }

    pub fn pipeline_id(&self) -> Uuid {
        self.shared.pipeline_id
    }
}
