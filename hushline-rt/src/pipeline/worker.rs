//! Denoise worker
//!
//! Dedicated OS thread that owns the engine in the worker topology. It pops
//! frames from the input ring, runs the engine and pushes results to the output
//! ring. When idle it parks in the ring's bounded `wait_for_data`; when the
//! output ring is full it waits once (bounded) for space and then drops the
//! frame it holds.
//!
//! The thread exits within one wait timeout of `stop()`. Any other exit
//! (including an engine panic) is noticed by the controller through
//! `WorkerHandle::is_finished`.

use super::frame_ring::{FrameConsumer, FrameProducer, RingSignal};
use super::PipelineShared;
use crate::engine::DenoiseEngine;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const THREAD_NAME: &str = "hushline-denoise";

/// Worker state moved onto the thread
pub struct DenoiseWorker {
    engine: Box<dyn DenoiseEngine>,
    input: FrameConsumer,
    output: FrameProducer,
    shared: Arc<PipelineShared>,
    stop_flag: Arc<AtomicBool>,
    wait_timeout: Duration,
}

impl DenoiseWorker {
    pub fn new(
        engine: Box<dyn DenoiseEngine>,
        input: FrameConsumer,
        output: FrameProducer,
        shared: Arc<PipelineShared>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            input,
            output,
            shared,
            stop_flag: Arc::new(AtomicBool::new(false)),
            wait_timeout,
        }
    }

    /// Start the worker thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let stop_flag = Arc::clone(&self.stop_flag);
        let signals = [self.input.signal(), self.output.signal()];

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(Error::Io)?;

        Ok(WorkerHandle {
            thread: Some(thread),
            stop_flag,
            signals,
        })
    }

    fn run(mut self) {
        let frame_length = self.engine.frame_length();
        info!("Denoise worker started (frame_length={})", frame_length);

        let mut frame_in = vec![0.0f32; frame_length];
        let mut frame_out = vec![0.0f32; frame_length];
        // Forces the first frame to pick up the current parameters
        let mut params_seen = u64::MAX;
        let mut failing = false;

        while !self.stop_flag.load(Ordering::Acquire) {
            if !self.input.wait_for_data(self.wait_timeout) {
                continue;
            }

            while !self.stop_flag.load(Ordering::Acquire) && self.input.pop(&mut frame_in) {
                self.shared
                    .params
                    .apply_if_changed(&mut params_seen, self.engine.as_mut());

                match self.engine.process(&frame_in, &mut frame_out) {
                    Ok(()) => {
                        if failing {
                            info!("Engine recovered, processing resumed");
                            failing = false;
                        }
                        self.shared.stats.record_processed();
                    }
                    Err(e) => {
                        // One warning per failure streak; the counter tracks the rest
                        if !failing {
                            warn!("Engine failed on frame, emitting raw input: {}", e);
                            failing = true;
                        }
                        frame_out.copy_from_slice(&frame_in);
                        self.shared.stats.record_failure();
                    }
                }

                if !self.push_output(&frame_out) {
                    self.shared.stats.record_overrun();
                }
            }
        }

        info!("Denoise worker stopped");
        // Engine is released here, on the worker thread
    }

    /// Push with a single bounded wait for space
    fn push_output(&mut self, frame: &[f32]) -> bool {
        if self.output.push(frame) {
            return true;
        }
        debug!("Output ring full, waiting up to {:?}", self.wait_timeout);
        self.output.wait_for_space(self.wait_timeout) && self.output.push(frame)
    }
}

/// Controller-side handle to a running worker
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    signals: [RingSignal; 2],
}

impl WorkerHandle {
    /// Ask the worker to exit and wake it if parked
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        for signal in &self.signals {
            signal.wake();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// True once the thread has exited for any reason
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Request stop and wait for the thread on the blocking pool
    ///
    /// Returns the panic message if the thread panicked.
    pub async fn stop(mut self) -> Option<String> {
        self.request_stop();
        let thread = self.thread.take()?;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => None,
            Ok(Err(panic)) => Some(panic_message(panic.as_ref())),
            Err(e) => Some(format!("join task failed: {}", e)),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Never leave a worker running without an owner
        self.request_stop();
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, PassthroughEngine};
    use crate::pipeline::frame_ring::frame_ring;
    use std::time::Instant;

    struct PanickingEngine;

    impl DenoiseEngine for PanickingEngine {
        fn frame_length(&self) -> usize {
            2
        }
        fn process(&mut self, _input: &[f32], _output: &mut [f32]) -> std::result::Result<(), EngineError> {
            panic!("engine exploded");
        }
        fn set_attenuation_limit(&mut self, _db: f32) {}
        fn set_post_filter_beta(&mut self, _beta: f32) {}
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[tokio::test]
    async fn test_worker_processes_frames_in_order() {
        let shared = Arc::new(PipelineShared::new(100.0, 0.0));
        let (mut to_worker, worker_in) = frame_ring(8, 2).unwrap();
        let (worker_out, mut from_worker) = frame_ring(8, 2).unwrap();

        let handle = DenoiseWorker::new(
            Box::new(PassthroughEngine::new(2)),
            worker_in,
            worker_out,
            Arc::clone(&shared),
            Duration::from_millis(5),
        )
        .spawn()
        .unwrap();

        for i in 0..5 {
            assert!(to_worker.push(&[i as f32, i as f32]));
        }

        assert!(wait_until(Duration::from_secs(2), || shared.stats.snapshot().frames_processed == 5));

        let mut frame = [0.0; 2];
        for i in 0..5 {
            assert!(from_worker.pop(&mut frame));
            assert_eq!(frame, [i as f32, i as f32]);
        }

        assert_eq!(handle.stop().await, None);
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let shared = Arc::new(PipelineShared::new(100.0, 0.0));
        let (_to_worker, worker_in) = frame_ring(4, 2).unwrap();
        let (worker_out, _from_worker) = frame_ring(4, 2).unwrap();

        let handle = DenoiseWorker::new(
            Box::new(PassthroughEngine::new(2)),
            worker_in,
            worker_out,
            shared,
            Duration::from_millis(10),
        )
        .spawn()
        .unwrap();

        let start = Instant::now();
        assert_eq!(handle.stop().await, None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_full_output_ring_counts_overrun() {
        let shared = Arc::new(PipelineShared::new(100.0, 0.0));
        let (mut to_worker, worker_in) = frame_ring(8, 2).unwrap();
        // Two slots -> one usable; nobody drains it
        let (worker_out, _from_worker) = frame_ring(2, 2).unwrap();

        let handle = DenoiseWorker::new(
            Box::new(PassthroughEngine::new(2)),
            worker_in,
            worker_out,
            Arc::clone(&shared),
            Duration::from_millis(1),
        )
        .spawn()
        .unwrap();

        for _ in 0..3 {
            assert!(to_worker.push(&[0.1, 0.1]));
        }

        assert!(wait_until(Duration::from_secs(2), || shared.stats.snapshot().overruns == 2));
        assert_eq!(shared.stats.snapshot().frames_processed, 3);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_engine_panic_finishes_thread() {
        let shared = Arc::new(PipelineShared::new(100.0, 0.0));
        let (mut to_worker, worker_in) = frame_ring(4, 2).unwrap();
        let (worker_out, _from_worker) = frame_ring(4, 2).unwrap();

        let handle = DenoiseWorker::new(
            Box::new(PanickingEngine),
            worker_in,
            worker_out,
            shared,
            Duration::from_millis(5),
        )
        .spawn()
        .unwrap();

        assert!(to_worker.push(&[0.0, 0.0]));
        assert!(wait_until(Duration::from_secs(2), || handle.is_finished()));
        assert!(!handle.stop_requested());

        let message = handle.stop().await;
        assert_eq!(message.as_deref(), Some("engine exploded"));
    }
}
