//! Test Helper Utilities
//!
//! Shared utilities for testing hushline-rt

#![allow(dead_code)]

pub mod engines;
pub mod signals;

pub use engines::{Behavior, EngineLog, ScriptedLoader};
pub use signals::{blocks, constant, sine};

use hushline_common::PipelineState;
use hushline_rt::config::PipelineConfig;
use hushline_rt::PipelineHandle;
use std::time::Duration;

/// Config with a fast housekeeping tick so tests observe changes quickly
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        stats_interval_ms: 10,
        wait_timeout_ms: 5,
        ..Default::default()
    }
}

/// Poll `cond` until it holds or `timeout` elapses, yielding to the runtime
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

/// Wait for the pipeline to reach `state`
pub async fn wait_for_state(handle: &PipelineHandle, state: PipelineState) -> bool {
    wait_for(Duration::from_secs(5), || handle.state() == state).await
}
