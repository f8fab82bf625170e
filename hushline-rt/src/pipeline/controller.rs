//! Pipeline controller
//!
//! Async task that owns the pipeline lifecycle. It is the only writer of the
//! shared state and the only place that allocates or frees pipeline resources.
//!
//! **State machine:**
//! ```text
//! Uninitialized --Init--> Loading --ok--> Ready <--SetEnabled--> Processing
//!                            |  \--load error--> Disabled
//!                            \--loader panic--> Error <--worker died-- Processing
//! any --Dispose / channel closed--> Disposed (terminal)
//! ```
//!
//! Every state except Processing makes the real-time side pass audio through.
//! A periodic housekeeping tick emits `Stats` when counters move, drops chains
//! handed back by the audio thread and checks that the worker is alive.

use super::assembler::FrameAssembler;
use super::drain::PlaybackDrain;
use super::frame_ring::frame_ring;
use super::processor::{EngineRoute, ProcessingChain, ProcessorCommand};
use super::smoother::OutputSmoother;
use super::worker::{panic_message, DenoiseWorker, WorkerHandle};
use super::PipelineShared;
use crate::cache::ModelCache;
use crate::config::PipelineConfig;
use crate::engine::{DenoiseEngine, EngineLoader};
use crate::error::{Error, Result};
use hushline_common::{
    ControlMessage, EventBus, ModelSource, PipelineEvent, PipelineState, StatsSnapshot, Topology,
};
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapProd};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Why a load did not produce a running chain
enum LoadFailure {
    /// Model or engine unavailable: permanent passthrough until re-init
    Unavailable(String),
    /// The loader task itself died
    Crashed(String),
}

pub struct PipelineController {
    config: PipelineConfig,
    shared: Arc<PipelineShared>,
    control_rx: mpsc::Receiver<ControlMessage>,
    commands: HeapProd<ProcessorCommand>,
    reclaim: HeapCons<Box<ProcessingChain>>,
    loader: Arc<dyn EngineLoader>,
    model_cache: Option<Arc<ModelCache>>,
    events: EventBus,
    worker: Option<WorkerHandle>,
    /// Whether a chain has been sent to the audio thread and not detached
    chain_attached: bool,
    last_stats: StatsSnapshot,
}

impl PipelineController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: PipelineConfig,
        shared: Arc<PipelineShared>,
        control_rx: mpsc::Receiver<ControlMessage>,
        commands: HeapProd<ProcessorCommand>,
        reclaim: HeapCons<Box<ProcessingChain>>,
        loader: Arc<dyn EngineLoader>,
        model_cache: Option<Arc<ModelCache>>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            shared,
            control_rx,
            commands,
            reclaim,
            loader,
            model_cache,
            events,
            worker: None,
            chain_attached: false,
            last_stats: StatsSnapshot::default(),
        }
    }

    /// Run until every `PipelineHandle` is dropped
    pub async fn run(mut self) {
        info!(
            "Pipeline {} controller started (topology={})",
            self.shared.pipeline_id, self.config.topology
        );

        let mut ticker = tokio::time::interval(self.config.stats_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.control_rx.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        info!("Control channel closed, disposing pipeline {}", self.shared.pipeline_id);
                        self.dispose().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.housekeeping(),
            }
        }

        self.reclaim_chains();
        info!("Pipeline {} controller stopped", self.shared.pipeline_id);
    }

    async fn handle_message(&mut self, message: ControlMessage) {
        let state = self.state();
        if state == PipelineState::Disposed {
            trace!("Ignoring {:?} after dispose", message);
            return;
        }

        match message {
            ControlMessage::Init {
                model,
                attenuation_limit_db,
            } => self.handle_init(model, attenuation_limit_db).await,
            ControlMessage::UpdateParams {
                attenuation_limit_db,
                post_filter_beta,
            } => self.handle_update_params(attenuation_limit_db, post_filter_beta),
            ControlMessage::SetEnabled { enabled } => self.handle_set_enabled(enabled),
            ControlMessage::ResetStats => {
                info!("Resetting pipeline statistics");
                self.shared.stats.reset();
                self.last_stats = StatsSnapshot::default();
            }
            ControlMessage::Dispose => self.dispose().await,
        }
    }

    async fn handle_init(&mut self, model: ModelSource, attenuation_limit_db: f32) {
        info!(
            "Init requested in state {} (attenuation_limit={:.1}dB)",
            self.state(),
            attenuation_limit_db
        );

        self.transition(PipelineState::Loading);
        self.teardown().await;

        let loader = Arc::clone(&self.loader);
        let cache = self.model_cache.clone();
        match load_engine(loader, cache, model, attenuation_limit_db).await {
            Ok(engine) => {
                self.shared.params.set_attenuation_limit(attenuation_limit_db);
                self.shared
                    .params
                    .set_post_filter_beta(self.config.default_post_filter_beta);
                if let Err(e) = self.install(engine) {
                    self.fail_init(LoadFailure::Unavailable(e.to_string()));
                }
            }
            Err(failure) => self.fail_init(failure),
        }
    }

    /// Build the chain for `engine`, start the worker if needed, hand it to the audio thread
    fn install(&mut self, engine: Box<dyn DenoiseEngine>) -> Result<()> {
        let frame_length = engine.frame_length();
        let config = &self.config;

        let route = match config.topology {
            Topology::InThread => EngineRoute::InThread {
                engine,
                params_seen: u64::MAX,
            },
            Topology::Worker => {
                let (to_worker, worker_in) = frame_ring(config.ring_capacity_frames, frame_length)?;
                let (worker_out, from_worker) = frame_ring(config.ring_capacity_frames, frame_length)?;
                let handle = DenoiseWorker::new(
                    engine,
                    worker_in,
                    worker_out,
                    Arc::clone(&self.shared),
                    config.wait_timeout(),
                )
                .spawn()?;
                self.worker = Some(handle);
                EngineRoute::Worker {
                    input: to_worker,
                    output: from_worker,
                }
            }
        };

        let chain = ProcessingChain::new(
            frame_length,
            FrameAssembler::new(frame_length, config.max_block_size),
            OutputSmoother::new(
                config.fade_length,
                config.user_gain,
                config.target_peak,
                config.click_threshold,
            ),
            PlaybackDrain::new(config.drain_capacity_samples(frame_length)),
            route,
        );

        self.reclaim_chains();
        if self
            .commands
            .try_push(ProcessorCommand::Attach(Box::new(chain)))
            .is_err()
        {
            return Err(Error::InvalidState(
                "processor command queue full (is the audio callback running?)".to_string(),
            ));
        }
        self.chain_attached = true;

        info!(
            "Engine ready: frame_length={}, topology={}",
            frame_length, self.config.topology
        );
        self.transition(PipelineState::Ready);
        self.events.emit_lossy(PipelineEvent::Ready {
            pipeline_id: self.shared.pipeline_id,
            frame_length,
            topology: self.config.topology,
            timestamp: chrono::Utc::now(),
        });

        if self.config.auto_enable {
            self.transition(PipelineState::Processing);
        }
        Ok(())
    }

    fn fail_init(&mut self, failure: LoadFailure) {
        let (next, message) = match failure {
            LoadFailure::Unavailable(message) => {
                warn!("Engine unavailable, passing audio through: {}", message);
                (PipelineState::Disabled, message)
            }
            LoadFailure::Crashed(message) => {
                error!("Engine loader crashed, passing audio through: {}", message);
                (PipelineState::Error, format!("engine loader crashed: {}", message))
            }
        };

        // Drop anything half-built (e.g. a worker started before the attach failed)
        if let Some(worker) = self.worker.take() {
            worker.request_stop();
        }
        self.transition(next);
        self.emit_error(message);
    }

    fn handle_update_params(&mut self, attenuation_limit_db: Option<f32>, post_filter_beta: Option<f32>) {
        let state = self.state();
        if !state.accepts_params() {
            trace!("Ignoring parameter update in state {}", state);
            return;
        }

        if let Some(db) = attenuation_limit_db {
            debug!("Attenuation limit -> {:.1}dB", db);
            self.shared.params.set_attenuation_limit(db);
        }
        if let Some(beta) = post_filter_beta {
            debug!("Post-filter beta -> {}", beta);
            self.shared.params.set_post_filter_beta(beta);
        }
    }

    fn handle_set_enabled(&mut self, enabled: bool) {
        let state = self.state();
        match (state, enabled) {
            (PipelineState::Ready, true) if self.chain_attached => {
                self.transition(PipelineState::Processing);
            }
            (PipelineState::Processing, false) => {
                self.transition(PipelineState::Ready);
            }
            (PipelineState::Ready, true) => {
                warn!("Cannot enable: no engine chain installed");
            }
            _ => debug!("SetEnabled({}) has no effect in state {}", enabled, state),
        }
    }

    /// Release engine, worker and rings. Idempotent.
    async fn dispose(&mut self) {
        if self.state() == PipelineState::Disposed {
            trace!("Dispose: already disposed");
            return;
        }

        info!("Disposing pipeline {}", self.shared.pipeline_id);
        self.transition(PipelineState::Disposed);
        self.teardown().await;
    }

    /// Detach the current chain and stop the worker
    async fn teardown(&mut self) {
        if self.chain_attached {
            if self.commands.try_push(ProcessorCommand::Detach).is_err() {
                warn!("Processor command queue full; chain will be released with the processor");
            }
            self.chain_attached = false;
        }

        if let Some(worker) = self.worker.take() {
            debug!("Stopping denoise worker");
            if let Some(panic) = worker.stop().await {
                warn!("Denoise worker had panicked: {}", panic);
            }
        }

        self.reclaim_chains();
    }

    fn housekeeping(&mut self) {
        self.reclaim_chains();
        self.check_worker();

        if self.state() == PipelineState::Disposed {
            return;
        }

        let stats = self.shared.stats.snapshot();
        if stats != self.last_stats {
            trace!(
                "Stats: processed={} underruns={} overruns={}",
                stats.frames_processed,
                stats.underruns,
                stats.overruns
            );
            self.last_stats = stats;
            self.events.emit_lossy(PipelineEvent::Stats {
                pipeline_id: self.shared.pipeline_id,
                stats,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Notice a worker that exited without being asked to
    fn check_worker(&mut self) {
        let died = self
            .worker
            .as_ref()
            .map_or(false, |w| w.is_finished() && !w.stop_requested());
        if !died {
            return;
        }

        error!("Denoise worker exited unexpectedly, passing audio through");
        self.worker = None;
        if self.chain_attached && self.commands.try_push(ProcessorCommand::Detach).is_ok() {
            self.chain_attached = false;
        }

        if self.state() == PipelineState::Processing {
            self.transition(PipelineState::Error);
        }
        self.emit_error("denoise worker exited unexpectedly".to_string());
    }

    /// Drop chains the audio thread handed back
    fn reclaim_chains(&mut self) {
        while let Some(chain) = self.reclaim.try_pop() {
            trace!("Reclaimed {} chain (frame_length={})", chain.topology(), chain.frame_length());
            drop(chain);
        }
    }

    fn state(&self) -> PipelineState {
        self.shared.state.load()
    }

    fn transition(&mut self, next: PipelineState) -> bool {
        let old = self.state();
        if old == next {
            return true;
        }
        if !old.can_transition_to(next) {
            warn!("Rejected state transition {} -> {}", old, next);
            return false;
        }

        self.shared.state.store(next);
        info!("Pipeline state: {} -> {}", old, next);
        self.events.emit_lossy(PipelineEvent::StateChanged {
            pipeline_id: self.shared.pipeline_id,
            old_state: old,
            new_state: next,
            timestamp: chrono::Utc::now(),
        });
        true
    }

    fn emit_error(&self, message: String) {
        self.events.emit_lossy(PipelineEvent::Error {
            pipeline_id: self.shared.pipeline_id,
            message,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Resolve model bytes and run the loader on the blocking pool
///
/// Takes owned handles so the controller is not borrowed across the await.
async fn load_engine(
    loader: Arc<dyn EngineLoader>,
    model_cache: Option<Arc<ModelCache>>,
    model: ModelSource,
    attenuation_limit_db: f32,
) -> std::result::Result<Box<dyn DenoiseEngine>, LoadFailure> {
    let bytes: Arc<[u8]> = match model {
        ModelSource::Bytes { data } => Arc::from(data),
        ModelSource::Cached { name } => {
            let cache = model_cache.ok_or_else(|| {
                LoadFailure::Unavailable(format!("no model cache configured for '{}'", name))
            })?;
            cache
                .get(&name)
                .await
                .map_err(|e| LoadFailure::Unavailable(e.to_string()))?
        }
    };

    debug!("Loading engine from {} model bytes", bytes.len());
    let result =
        tokio::task::spawn_blocking(move || loader.load(&bytes, attenuation_limit_db)).await;

    match result {
        Ok(Ok(engine)) if engine.frame_length() == 0 => Err(LoadFailure::Unavailable(
            "engine reported a zero frame length".to_string(),
        )),
        Ok(Ok(engine)) => Ok(engine),
        Ok(Err(e)) => Err(LoadFailure::Unavailable(e.to_string())),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic().as_ref())
            } else {
                join_error.to_string()
            };
            Err(LoadFailure::Crashed(message))
        }
    }
}
