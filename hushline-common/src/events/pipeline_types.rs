//! Pipeline-related type definitions
//!
//! Supporting types for lifecycle state, topology and statistics.

use serde::{Deserialize, Serialize};

/// Pipeline lifecycle state
///
/// ```text
/// Uninitialized --init--> Loading --success--> Ready --enable--> Processing
///                            |                   ^                   |
///                            +--failure--> Disabled      <--disable--+
/// any state --dispose--> Disposed (terminal)
/// ```
///
/// `Error` is reachable from `Loading` and `Processing`. Every state other than
/// `Processing` passes audio through unmodified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Processing = 3,
    Disabled = 4,
    Error = 5,
    Disposed = 6,
}

impl PipelineState {
    /// Decode the `repr(u8)` value stored in an atomic
    ///
    /// Unknown values map to `Disposed` so a corrupted word can only ever
    /// produce passthrough audio.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Loading,
            2 => PipelineState::Ready,
            3 => PipelineState::Processing,
            4 => PipelineState::Disabled,
            5 => PipelineState::Error,
            _ => PipelineState::Disposed,
        }
    }

    /// Whether `self -> next` is a legal lifecycle transition
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self == Disposed {
            return false;
        }
        if next == Disposed {
            return true;
        }

        matches!(
            (self, next),
            (Uninitialized, Loading)
                | (Loading, Ready)
                | (Loading, Disabled)
                | (Loading, Error)
                | (Ready, Processing)
                | (Ready, Loading)
                | (Processing, Ready)
                | (Processing, Error)
                | (Processing, Loading)
                | (Disabled, Loading)
                | (Error, Loading)
        )
    }

    /// Parameter updates are only forwarded in these states
    pub fn accepts_params(self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::Processing)
    }

    /// Whether the engine path is active (all other states pass audio through)
    pub fn is_processing(self) -> bool {
        self == PipelineState::Processing
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Uninitialized => write!(f, "uninitialized"),
            PipelineState::Loading => write!(f, "loading"),
            PipelineState::Ready => write!(f, "ready"),
            PipelineState::Processing => write!(f, "processing"),
            PipelineState::Disabled => write!(f, "disabled"),
            PipelineState::Error => write!(f, "error"),
            PipelineState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Where the denoising engine runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Engine called synchronously inside the audio callback
    InThread,
    /// Engine called on a dedicated worker thread, fed through ring buffers
    #[default]
    Worker,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::InThread => write!(f, "in_thread"),
            Topology::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for Topology {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_thread" | "in-thread" | "inthread" => Ok(Topology::InThread),
            "worker" => Ok(Topology::Worker),
            other => Err(crate::Error::InvalidInput(format!("Unknown topology: {}", other))),
        }
    }
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames the engine returned successfully
    pub frames_processed: u64,
    /// Frames handed to the engine path (pushed to the input ring or called in-thread)
    pub frames_submitted: u64,
    /// Ticks where the drain had to backfill with raw input
    pub underruns: u64,
    /// Frames dropped or truncated because a downstream buffer was full
    pub overruns: u64,
    /// Processed samples discarded by the drop-oldest policy
    pub dropped_samples: u64,
    /// Frame boundaries whose jump exceeded the click threshold
    pub declick_events: u64,
    /// Frames where the engine call failed and raw input was emitted instead
    pub processing_failures: u64,
}

/// Where `Init` gets its model bytes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModelSource {
    /// Model bytes supplied inline
    Bytes { data: Vec<u8> },
    /// Model resolved by name through the host's model cache
    Cached { name: String },
}

impl ModelSource {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        ModelSource::Bytes { data: data.into() }
    }

    pub fn cached(name: impl Into<String>) -> Self {
        ModelSource::Cached { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            PipelineState::Uninitialized,
            PipelineState::Loading,
            PipelineState::Ready,
            PipelineState::Processing,
            PipelineState::Disabled,
            PipelineState::Error,
            PipelineState::Disposed,
        ] {
            assert_eq!(PipelineState::from_u8(state as u8), state);
        }
        assert_eq!(PipelineState::from_u8(200), PipelineState::Disposed);
    }

    #[test]
    fn test_lifecycle_transitions() {
        use PipelineState::*;

        assert!(Uninitialized.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Ready));
        assert!(Loading.can_transition_to(Disabled));
        assert!(Ready.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Disabled.can_transition_to(Loading));

        // Cannot skip loading
        assert!(!Uninitialized.can_transition_to(Ready));
        assert!(!Disabled.can_transition_to(Processing));

        // Dispose from anywhere, then nothing
        assert!(Processing.can_transition_to(Disposed));
        assert!(Uninitialized.can_transition_to(Disposed));
        assert!(!Disposed.can_transition_to(Loading));
        assert!(!Disposed.can_transition_to(Disposed));
    }

    #[test]
    fn test_params_only_in_ready_or_processing() {
        assert!(PipelineState::Ready.accepts_params());
        assert!(PipelineState::Processing.accepts_params());
        assert!(!PipelineState::Disabled.accepts_params());
        assert!(!PipelineState::Loading.accepts_params());
        assert!(!PipelineState::Disposed.accepts_params());
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!("worker".parse::<Topology>().unwrap(), Topology::Worker);
        assert_eq!("in-thread".parse::<Topology>().unwrap(), Topology::InThread);
        assert!("gpu".parse::<Topology>().is_err());
    }
}
