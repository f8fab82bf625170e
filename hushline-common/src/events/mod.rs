//! Control channel message types
//!
//! Inbound `ControlMessage`s drive the pipeline lifecycle; outbound
//! `PipelineEvent`s are fanned out to every subscriber through `EventBus`.

mod pipeline_types;

pub use pipeline_types::{ModelSource, PipelineState, StatsSnapshot, Topology};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Messages from the host application to the pipeline controller
///
/// Delivery is at-most-once. There is no ordering guarantee relative to audio
/// frames: a change applies at the next frame boundary after the controller
/// handles it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Load an engine from model bytes and start processing
    Init {
        model: ModelSource,
        attenuation_limit_db: f32,
    },

    /// Forward new engine parameters (ignored outside Ready/Processing)
    UpdateParams {
        #[serde(default)]
        attenuation_limit_db: Option<f32>,
        #[serde(default)]
        post_filter_beta: Option<f32>,
    },

    /// Enable (Ready -> Processing) or disable (Processing -> Ready) the engine path
    SetEnabled { enabled: bool },

    /// Zero all statistics counters
    ResetStats,

    /// Release the engine, worker and ring buffers (terminal)
    Dispose,
}

/// Notifications from the pipeline controller to the host application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Engine loaded and chain installed
    Ready {
        pipeline_id: Uuid,
        /// Engine frame length in samples
        frame_length: usize,
        topology: Topology,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Informational failure notice; audio keeps flowing in passthrough
    Error {
        pipeline_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic counter snapshot, emitted when counters changed
    Stats {
        pipeline_id: Uuid,
        #[serde(flatten)]
        stats: StatsSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Lifecycle transition
    StateChanged {
        pipeline_id: Uuid,
        old_state: PipelineState,
        new_state: PipelineState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PipelineEvent {
    /// Event type name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::Ready { .. } => "Ready",
            PipelineEvent::Error { .. } => "Error",
            PipelineEvent::Stats { .. } => "Stats",
            PipelineEvent::StateChanged { .. } => "StateChanged",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Fan-out bus for pipeline notifications
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block the controller)
/// - Multiple concurrent subscribers
/// - Lagged subscribers lose the oldest events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
