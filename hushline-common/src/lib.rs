//! # Hushline Common Library
//!
//! Shared code for the hushline noise-suppression pipeline and its hosts:
//! - Control messages and outbound notifications (the control channel)
//! - Pipeline lifecycle state and topology enums
//! - Statistics snapshot type
//! - EventBus for notification fan-out
//! - Configuration file resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{
    ControlMessage, EventBus, ModelSource, PipelineEvent, PipelineState, StatsSnapshot, Topology,
};
